//! Engine configuration.
//!
//! [`EngineConfig`] is stored as TOML. Every section and field is optional; anything
//! unspecified falls back to the defaults below.
//!
//! ```toml
//! [detection]
//! confidence_level = 0.99
//! max_iterations = 10
//! auto_restore = true
//!
//! [consistency]
//! voltage_min_pu = 0.9
//! ```

use std::path::Path;

use gridwatch_core::{GridError, GridResult};
use serde::{Deserialize, Serialize};

/// Top-level configuration for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bad-data detection loop parameters.
    pub detection: DetectionConfig,

    /// Thresholds for the solver-free consistency checks.
    pub consistency: ConsistencyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// 0.90, 0.95 or 0.99; other values use the 0.95 critical z.
    pub confidence_level: f64,

    /// Upper bound on measurements removed in one session.
    pub max_iterations: usize,

    /// Put the entry-time measurement set back when the session ends.
    pub auto_restore: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            max_iterations: 5,
            auto_restore: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Flow magnitude below which a reading is treated as zero.
    pub tolerance: f64,

    /// Plausible voltage band (per-unit).
    pub voltage_min_pu: f64,
    pub voltage_max_pu: f64,

    /// Plausible flow magnitudes.
    pub max_flow_mw: f64,
    pub max_flow_mvar: f64,

    /// Largest implied loss on a branch as a fraction of its larger end flow.
    pub loss_fraction: f64,

    /// Largest voltage magnitude difference across a live branch (per-unit).
    pub max_voltage_step_pu: f64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            voltage_min_pu: 0.85,
            voltage_max_pu: 1.15,
            max_flow_mw: 1000.0,
            max_flow_mvar: 1000.0,
            loss_fraction: 0.1,
            max_voltage_step_pu: 0.1,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> GridResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: impl AsRef<Path>) -> GridResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> GridResult<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> GridResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> GridResult<()> {
        let invalid = |msg: String| Err(GridError::Configuration(msg));
        let d = &self.detection;
        if d.max_iterations == 0 {
            return invalid("detection.max_iterations must be at least 1".into());
        }
        if !(d.confidence_level > 0.0 && d.confidence_level < 1.0) {
            return invalid(format!(
                "detection.confidence_level must lie in (0, 1), got {}",
                d.confidence_level
            ));
        }

        let c = &self.consistency;
        if !(c.tolerance > 0.0) {
            return invalid(format!(
                "consistency.tolerance must be positive, got {}",
                c.tolerance
            ));
        }
        if !(c.voltage_min_pu < c.voltage_max_pu) {
            return invalid(format!(
                "consistency voltage band is inverted: [{}, {}]",
                c.voltage_min_pu, c.voltage_max_pu
            ));
        }
        if !(c.max_flow_mw > 0.0 && c.max_flow_mvar > 0.0) {
            return invalid("consistency flow limits must be positive".into());
        }
        if !(c.loss_fraction >= 0.0) {
            return invalid("consistency.loss_fraction must not be negative".into());
        }
        if !(c.max_voltage_step_pu > 0.0) {
            return invalid("consistency.max_voltage_step_pu must be positive".into());
        }
        Ok(())
    }
}
