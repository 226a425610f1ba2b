//! Configured entry point running every analysis against a [`GridContext`].

use std::path::Path;

use gridwatch_core::{BranchId, Diagnostics, GridContext, GridResult, StateSolver, SwitchId};
use serde::Serialize;
use tracing::{info, warn};

use crate::bad_data::{detect_bad_data, BadDataSession};
use crate::config::EngineConfig;
use crate::consistency::{check_consistency, ConsistencyReport};
use crate::observability::{score, ObservabilityReport};
use crate::topology::{self, analyze, SwitchInfo, SwitchingOutcome, TopologyReport};

/// Everything one full run produces.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    /// Model problems found before analysis
    pub diagnostics: Diagnostics,
    pub topology: TopologyReport,
    pub observability: ObservabilityReport,
    pub consistency: ConsistencyReport,
    pub bad_data: BadDataSession,
}

impl EngineReport {
    pub fn to_json(&self) -> GridResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> GridResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> GridResult<Self> {
        Self::new(EngineConfig::load_from(path)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Structural checks on the grid model.
    pub fn validate(&self, ctx: &GridContext) -> Diagnostics {
        let mut diag = Diagnostics::new();
        ctx.network.validate_into(&mut diag);
        diag
    }

    pub fn analyze_topology(&self, ctx: &GridContext) -> TopologyReport {
        analyze(&ctx.network)
    }

    pub fn score(&self, ctx: &GridContext) -> GridResult<ObservabilityReport> {
        score(&ctx.network, &ctx.measurements)
    }

    pub fn check_consistency(&self, ctx: &GridContext) -> GridResult<ConsistencyReport> {
        check_consistency(&ctx.network, &ctx.measurements, &self.config.consistency)
    }

    pub fn detect_bad_data<S: StateSolver + ?Sized>(
        &self,
        ctx: &mut GridContext,
        solver: &S,
    ) -> GridResult<BadDataSession> {
        let d = &self.config.detection;
        detect_bad_data(ctx, solver, d.confidence_level, d.max_iterations, d.auto_restore)
    }

    pub fn toggle_switch(
        &self,
        ctx: &mut GridContext,
        id: SwitchId,
        force_state: Option<bool>,
    ) -> GridResult<SwitchingOutcome> {
        topology::toggle_switch(&mut ctx.network, id, force_state)
    }

    pub fn set_branch_in_service(
        &self,
        ctx: &mut GridContext,
        id: BranchId,
        in_service: bool,
    ) -> GridResult<SwitchingOutcome> {
        topology::set_branch_in_service(&mut ctx.network, id, in_service)
    }

    pub fn switch_info(&self, ctx: &GridContext) -> Vec<SwitchInfo> {
        topology::switch_info(&ctx.network)
    }

    /// Topology, scoring and consistency on the entry-time measurements, then
    /// bad-data detection.
    pub fn run<S: StateSolver + ?Sized>(
        &self,
        ctx: &mut GridContext,
        solver: &S,
    ) -> GridResult<EngineReport> {
        info!(stats = %ctx.network.stats(), "engine run started");
        let diagnostics = self.validate(ctx);
        for issue in diagnostics.errors() {
            warn!(%issue, "grid model error");
        }
        let topology = self.analyze_topology(ctx);
        let observability = self.score(ctx)?;
        let consistency = self.check_consistency(ctx)?;
        let bad_data = self.detect_bad_data(ctx, solver)?;
        Ok(EngineReport {
            diagnostics,
            topology,
            observability,
            consistency,
            bad_data,
        })
    }
}
