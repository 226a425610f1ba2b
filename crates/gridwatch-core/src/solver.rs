//! Seam to the external state-estimation solver.
//!
//! The engine never runs power-flow or WLS iterations itself. It hands the current
//! network and measurement set to a [`StateSolver`] and compares what comes back
//! against the measurements.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::GridError;
use crate::measurement::{MeasurementSet, MeasurementTarget, Side};
use crate::units::{Megavars, Megawatts, PerUnit, Radians};
use crate::{BranchId, BusId, Network};

/// Estimated complex voltage at a bus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusState {
    pub vm: PerUnit,
    pub va: Radians,
}

impl BusState {
    pub fn new(vm: PerUnit, va: Radians) -> Self {
        Self { vm, va }
    }
}

/// Estimated power flow at both ends of a branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchFlow {
    pub p_from: Megawatts,
    pub q_from: Megavars,
    pub p_to: Megawatts,
    pub q_to: Megavars,
}

impl BranchFlow {
    pub fn p(&self, side: Side) -> Megawatts {
        match side {
            Side::From => self.p_from,
            Side::To => self.p_to,
        }
    }

    pub fn q(&self, side: Side) -> Megavars {
        match side {
            Side::From => self.q_from,
            Side::To => self.q_to,
        }
    }
}

/// Result of one solver run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub buses: HashMap<BusId, BusState>,
    pub branches: HashMap<BranchId, BranchFlow>,
}

impl Estimate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bus(&mut self, bus: BusId, state: BusState) {
        self.buses.insert(bus, state);
    }

    pub fn set_branch(&mut self, branch: BranchId, flow: BranchFlow) {
        self.branches.insert(branch, flow);
    }

    /// Estimated value of the quantity `target` measures, in the measurement's unit.
    /// `None` when the estimate lacks it or holds a non-finite number for it.
    pub fn value_for(&self, target: &MeasurementTarget) -> Option<f64> {
        match *target {
            MeasurementTarget::Voltage { bus } => {
                let vm = self.buses.get(&bus)?.vm;
                vm.is_finite().then(|| vm.value())
            }
            MeasurementTarget::ActivePower { branch, side } => {
                let p = self.branches.get(&branch)?.p(side);
                p.is_finite().then(|| p.value())
            }
            MeasurementTarget::ReactivePower { branch, side } => {
                let q = self.branches.get(&branch)?.q(side);
                q.is_finite().then(|| q.value())
            }
        }
    }
}

/// The solver gave up; `reason` is kept verbatim for the session record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct NonConvergence {
    pub reason: String,
}

impl NonConvergence {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<NonConvergence> for GridError {
    fn from(err: NonConvergence) -> Self {
        GridError::SolverNonConvergence(err.reason)
    }
}

/// A state estimator the engine can call.
///
/// Any `Fn(&Network, &MeasurementSet) -> Result<Estimate, NonConvergence>` closure
/// is a solver.
pub trait StateSolver {
    fn solve(
        &self,
        network: &Network,
        measurements: &MeasurementSet,
    ) -> Result<Estimate, NonConvergence>;
}

impl<F> StateSolver for F
where
    F: Fn(&Network, &MeasurementSet) -> Result<Estimate, NonConvergence>,
{
    fn solve(
        &self,
        network: &Network,
        measurements: &MeasurementSet,
    ) -> Result<Estimate, NonConvergence> {
        self(network, measurements)
    }
}
