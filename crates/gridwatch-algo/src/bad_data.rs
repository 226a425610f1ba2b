//! Iterative bad-data detection.
//!
//! Each iteration asks the solver for an estimate, runs the global chi-square test
//! on the residuals and, if it fails, removes the measurement with the largest
//! normalized residual. The session ends in one of four terminal states:
//!
//! ```text
//! Running(k) ──chi-square passes──────────────▶ Clean
//!     │ ──suspect judged not individually bad─▶ SystematicErrorSuspected
//!     │ ──removal budget consumed, test fails─▶ MaxIterationsReached
//!     │ ──solver gives up─────────────────────▶ SolverFailed
//!     └──suspect judged bad: remove, k+1──────▶ Running(k+1)
//! ```
//!
//! The measurement set is edited in place. An entry-time snapshot is kept for the
//! whole session; it is written back when `auto_restore` is set, and always when the
//! loop aborts with an error.

use gridwatch_core::{
    GridContext, GridError, GridResult, MeasurementId, MeasurementKind, MeasurementTarget,
    StateSolver,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::stats::{
    chi_square_test, compute_residuals, count_exceeding, critical_z, largest_normalized,
};

/// How far the suspect's z may exceed the critical z and still count as "not bad"
pub const SUSPECT_Z_FACTOR: f64 = 1.2;
/// Absolute z ceiling for a "not bad" suspect
pub const SUSPECT_Z_CEILING: f64 = 3.0;
/// More measurements than this above the critical z points at a systematic error
pub const MAX_EXCEEDING: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Running { iteration: usize },
    Clean,
    SystematicErrorSuspected,
    MaxIterationsReached,
    SolverFailed { reason: String },
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running { .. })
    }
}

/// A measurement taken out of the working set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedMeasurement {
    pub id: MeasurementId,
    pub kind: MeasurementKind,
    pub target: MeasurementTarget,
    pub original_value: f64,
    pub residual: f64,
    pub normalized_residual: f64,
    pub iteration: usize,
}

/// Statistics of one solve + test round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationStats {
    pub iteration: usize,
    pub chi_square: f64,
    pub critical_value: f64,
    pub dof: usize,
    pub passed: bool,
    pub suspect: Option<MeasurementId>,
    pub suspect_normalized_residual: Option<f64>,
    /// Measurements whose normalized residual exceeds the critical z
    pub exceeding_critical_z: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadDataSession {
    pub confidence_level: f64,
    pub critical_z: f64,
    pub max_iterations: usize,
    /// Removal iterations performed
    pub iterations: usize,
    pub removed: Vec<RemovedMeasurement>,
    pub history: Vec<IterationStats>,
    pub status: SessionStatus,
    pub entry_count: usize,
    pub restored: bool,
    /// Convergence of the solve run after restoring, when one was run
    pub restore_solve_converged: Option<bool>,
}

impl BadDataSession {
    pub fn removed_ids(&self) -> Vec<MeasurementId> {
        self.removed.iter().map(|r| r.id).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.status == SessionStatus::Clean
    }

    /// Treat a failed solve as an error.
    pub fn into_result(self) -> GridResult<Self> {
        match &self.status {
            SessionStatus::SolverFailed { reason } => {
                Err(GridError::SolverNonConvergence(reason.clone()))
            }
            _ => Ok(self),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspectVerdict {
    /// Remove the suspect and iterate
    Bad,
    /// Stop: the error looks systematic rather than individual
    NotIndividuallyBad,
}

/// Decide whether the largest-residual measurement is individually bad.
///
/// The suspect is "not bad" when its z is small (within 1.2·c and at most 3.0) while
/// few measurements exceed `c`, or whenever more than five measurements exceed `c`.
/// Everything else is bad.
pub fn validate_suspect(z: f64, critical_z: f64, exceeding: usize) -> SuspectVerdict {
    if exceeding > MAX_EXCEEDING {
        return SuspectVerdict::NotIndividuallyBad;
    }
    if z <= SUSPECT_Z_FACTOR * critical_z && z <= SUSPECT_Z_CEILING {
        SuspectVerdict::NotIndividuallyBad
    } else {
        SuspectVerdict::Bad
    }
}

/// Run the detection loop on `ctx.measurements`.
///
/// Fails with [`GridError::Configuration`] when the grid has no buses, the measurement
/// set is empty or `max_iterations` is zero. A solver failure is not an error: it
/// ends the session in [`SessionStatus::SolverFailed`].
pub fn detect_bad_data<S: StateSolver + ?Sized>(
    ctx: &mut GridContext,
    solver: &S,
    confidence_level: f64,
    max_iterations: usize,
    auto_restore: bool,
) -> GridResult<BadDataSession> {
    ctx.require_buses()?;
    ctx.require_measurements()?;
    if max_iterations == 0 {
        return Err(GridError::Configuration(
            "max_iterations must be at least 1".to_string(),
        ));
    }

    let backup = ctx.measurements.snapshot();
    let c = critical_z(confidence_level);
    let mut session = BadDataSession {
        confidence_level,
        critical_z: c,
        max_iterations,
        iterations: 0,
        removed: Vec::new(),
        history: Vec::new(),
        status: SessionStatus::Running { iteration: 1 },
        entry_count: backup.len(),
        restored: false,
        restore_solve_converged: None,
    };
    info!(
        measurements = session.entry_count,
        confidence_level, max_iterations, "bad-data session started"
    );

    if let Err(err) = run_loop(ctx, solver, &mut session) {
        ctx.measurements.restore(&backup);
        warn!(error = %err, "bad-data session aborted, measurements restored");
        return Err(err);
    }

    if auto_restore {
        ctx.measurements.restore(&backup);
        session.restored = true;
        let converged = solver.solve(&ctx.network, &ctx.measurements).is_ok();
        session.restore_solve_converged = Some(converged);
        info!(converged, "measurements restored");
    }

    info!(
        status = ?session.status,
        removed = session.removed.len(),
        "bad-data session finished"
    );
    Ok(session)
}

fn run_loop<S: StateSolver + ?Sized>(
    ctx: &mut GridContext,
    solver: &S,
    session: &mut BadDataSession,
) -> GridResult<()> {
    let c = session.critical_z;
    while let SessionStatus::Running { iteration } = session.status {
        let estimate = match solver.solve(&ctx.network, &ctx.measurements) {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!(iteration, reason = %err, "solver did not converge");
                session.status = SessionStatus::SolverFailed { reason: err.reason };
                break;
            }
        };

        let residuals = compute_residuals(&ctx.measurements, &estimate)?;
        let test = chi_square_test(&residuals);
        let suspect = largest_normalized(&residuals);
        let exceeding = count_exceeding(&residuals, c);
        session.history.push(IterationStats {
            iteration,
            chi_square: test.statistic,
            critical_value: test.critical_value,
            dof: test.dof,
            passed: test.passed,
            suspect: suspect.map(|s| s.id),
            suspect_normalized_residual: suspect.map(|s| s.normalized),
            exceeding_critical_z: exceeding,
        });
        debug!(
            iteration,
            chi_square = test.statistic,
            critical = test.critical_value,
            dof = test.dof,
            exceeding,
            "chi-square test"
        );

        if test.passed {
            session.status = SessionStatus::Clean;
            break;
        }
        if session.iterations >= session.max_iterations {
            session.status = SessionStatus::MaxIterationsReached;
            break;
        }
        let Some(suspect) = suspect else {
            session.status = SessionStatus::Clean;
            break;
        };

        match validate_suspect(suspect.normalized, c, exceeding) {
            SuspectVerdict::NotIndividuallyBad => {
                session.status = SessionStatus::SystematicErrorSuspected;
            }
            SuspectVerdict::Bad => {
                let removed = ctx.measurements.remove(suspect.id)?;
                info!(
                    iteration,
                    measurement = %removed.id,
                    target = %removed.target,
                    normalized_residual = suspect.normalized,
                    "removing bad measurement"
                );
                session.removed.push(RemovedMeasurement {
                    id: removed.id,
                    kind: removed.kind(),
                    target: removed.target,
                    original_value: removed.value,
                    residual: suspect.residual,
                    normalized_residual: suspect.normalized,
                    iteration,
                });
                session.iterations += 1;
                session.status = SessionStatus::Running {
                    iteration: iteration + 1,
                };
            }
        }
    }
    Ok(())
}
