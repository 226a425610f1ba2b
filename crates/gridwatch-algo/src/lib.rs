//! # gridwatch-algo: observability and bad-data detection
//!
//! Analyses over a [`GridContext`](gridwatch_core::GridContext):
//!
//! - [`topology`]: islands, isolated and radial buses, open-switch impact, and
//!   transactional switching that refuses to isolate a bus.
//! - [`observability`]: solver-free observability scoring and critical measurements.
//! - [`bad_data`]: the iterative chi-square / largest-normalized-residual loop around
//!   an external [`StateSolver`](gridwatch_core::StateSolver).
//! - [`consistency`]: plausibility checks on raw measurements.
//! - [`engine`]: one configured entry point for all of the above.
//!
//! ```
//! use gridwatch_algo::engine::Engine;
//! use gridwatch_algo::config::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str("[detection]\nconfidence_level = 0.99\n").unwrap();
//! let engine = Engine::new(config).unwrap();
//! assert_eq!(engine.config().detection.max_iterations, 5);
//! ```

pub mod bad_data;
pub mod config;
pub mod consistency;
pub mod engine;
pub mod observability;
pub mod stats;
pub mod topology;

pub use bad_data::{
    detect_bad_data, validate_suspect, BadDataSession, IterationStats, RemovedMeasurement,
    SessionStatus, SuspectVerdict,
};
pub use config::{ConsistencyConfig, DetectionConfig, EngineConfig};
pub use consistency::{
    check_consistency, ConsistencyReport, ConsistencyStatus, Violation, ViolationCategory,
};
pub use engine::{Engine, EngineReport};
pub use observability::{
    score, ConditionStatus, CriticalMeasurement, ObservabilityReport, ObservabilityVerdict,
};
pub use topology::{
    analyze, set_branch_in_service, switch_info, toggle_switch, ConnectivityStatus,
    OverallStatus, SwitchImpact, SwitchInfo, SwitchIssue, SwitchSeverity, SwitchingOutcome,
    TopologyReport,
};
