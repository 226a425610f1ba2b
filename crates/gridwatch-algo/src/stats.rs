//! Residual and chi-square helpers shared by the detectors.

use gridwatch_core::{
    Estimate, GridError, GridResult, MeasurementId, MeasurementSet, MeasurementTarget,
};
use serde::Serialize;
use tracing::warn;

/// Critical z for a confidence level. Levels other than 0.90/0.95/0.99 use 0.95's value.
pub fn critical_z(confidence_level: f64) -> f64 {
    const LEVELS: [(f64, f64); 3] = [(0.90, 1.64), (0.95, 1.96), (0.99, 2.58)];
    LEVELS
        .iter()
        .find(|(level, _)| (confidence_level - level).abs() < 1e-9)
        .map(|(_, z)| *z)
        .unwrap_or(1.96)
}

/// |residual| / sigma, or |residual| when sigma is not positive.
///
/// A non-finite residual or sigma yields `f64::INFINITY`, so a corrupt reading fails
/// the global test and ranks first for removal.
pub fn normalized_residual(residual: f64, sigma: f64) -> f64 {
    if !residual.is_finite() || !sigma.is_finite() {
        f64::INFINITY
    } else if sigma > 0.0 {
        residual.abs() / sigma
    } else {
        residual.abs()
    }
}

/// Approximate chi-square critical value: dof + 1.5·√(2·dof).
pub fn chi_square_critical(dof: usize) -> f64 {
    let dof = dof as f64;
    dof + 1.5 * (2.0 * dof).sqrt()
}

/// One measurement compared against a state estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Residual {
    pub id: MeasurementId,
    pub target: MeasurementTarget,
    pub measured: f64,
    pub estimated: f64,
    /// measured − estimated
    pub residual: f64,
    pub sigma: f64,
    pub normalized: f64,
}

/// Residuals for every measurement, ordered by measurement id.
pub fn compute_residuals(
    measurements: &MeasurementSet,
    estimate: &Estimate,
) -> GridResult<Vec<Residual>> {
    let mut residuals = Vec::with_capacity(measurements.len());
    for m in measurements.iter() {
        let estimated = estimate
            .value_for(&m.target)
            .ok_or_else(|| GridError::IncompleteEstimate(m.target.to_string()))?;
        if !m.value.is_finite() || !m.sigma.is_finite() {
            warn!(measurement = %m.id, value = m.value, sigma = m.sigma, "non-finite measurement");
        } else if m.sigma <= 0.0 {
            warn!(measurement = %m.id, sigma = m.sigma, "non-positive sigma, using raw residual");
        }
        let residual = m.value - estimated;
        residuals.push(Residual {
            id: m.id,
            target: m.target,
            measured: m.value,
            estimated,
            residual,
            sigma: m.sigma,
            normalized: normalized_residual(residual, m.sigma),
        });
    }
    Ok(residuals)
}

/// Σ(residual/σ)² with the same σ fallback as [`normalized_residual`].
pub fn chi_square(residuals: &[Residual]) -> f64 {
    residuals.iter().map(|r| r.normalized * r.normalized).sum()
}

/// Outcome of the global chi-square test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChiSquareTest {
    pub statistic: f64,
    pub dof: usize,
    pub critical_value: f64,
    /// statistic ≤ critical value
    pub passed: bool,
}

/// Global test with degrees of freedom equal to the measurement count.
pub fn chi_square_test(residuals: &[Residual]) -> ChiSquareTest {
    let statistic = chi_square(residuals);
    let dof = residuals.len();
    let critical_value = chi_square_critical(dof);
    ChiSquareTest {
        statistic,
        dof,
        critical_value,
        passed: statistic <= critical_value,
    }
}

/// The residual with the largest normalized value; ties go to the lowest id.
pub fn largest_normalized(residuals: &[Residual]) -> Option<&Residual> {
    residuals
        .iter()
        .max_by(|a, b| a.normalized.total_cmp(&b.normalized).then(b.id.cmp(&a.id)))
}

pub fn count_exceeding(residuals: &[Residual], threshold: f64) -> usize {
    residuals.iter().filter(|r| r.normalized > threshold).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwatch_core::{BranchFlow, BranchId, BusId, BusState, Megawatts, PerUnit, Radians, Side};

    fn residual(id: usize, normalized: f64) -> Residual {
        Residual {
            id: MeasurementId::new(id),
            target: MeasurementTarget::Voltage { bus: BusId::new(id) },
            measured: normalized,
            estimated: 0.0,
            residual: normalized,
            sigma: 1.0,
            normalized,
        }
    }

    #[test]
    fn critical_z_table() {
        assert_eq!(critical_z(0.90), 1.64);
        assert_eq!(critical_z(0.95), 1.96);
        assert_eq!(critical_z(0.99), 2.58);
        assert_eq!(critical_z(0.80), 1.96);
    }

    #[test]
    fn sigma_fallback() {
        assert!((normalized_residual(-0.3, 0.1) - 3.0).abs() < 1e-9);
        assert_eq!(normalized_residual(-0.3, 0.0), 0.3);
        assert_eq!(normalized_residual(0.3, -1.0), 0.3);
    }

    #[test]
    fn non_finite_inputs_rank_above_everything() {
        assert_eq!(normalized_residual(f64::NAN, 1.0), f64::INFINITY);
        assert_eq!(normalized_residual(2.0, f64::NAN), f64::INFINITY);
        assert_eq!(normalized_residual(f64::NEG_INFINITY, 0.0), f64::INFINITY);

        let residuals = vec![residual(1, 40.0), residual(5, f64::INFINITY), residual(3, f64::INFINITY)];
        assert_eq!(largest_normalized(&residuals).unwrap().id, MeasurementId::new(3));
        assert!(!chi_square_test(&residuals).passed);
        assert_eq!(count_exceeding(&residuals, 1.96), 3);
    }

    #[test]
    fn critical_value_formula() {
        assert_eq!(chi_square_critical(0), 0.0);
        assert!((chi_square_critical(50) - 65.0).abs() < 1e-12);
    }

    #[test]
    fn ties_go_to_lowest_id() {
        let residuals = vec![residual(4, 2.0), residual(2, 5.0), residual(1, 5.0), residual(3, 1.0)];
        assert_eq!(largest_normalized(&residuals).unwrap().id, MeasurementId::new(1));
        assert!(largest_normalized(&[]).is_none());
        assert_eq!(count_exceeding(&residuals, 1.96), 3);
    }

    #[test]
    fn residuals_follow_the_estimate() {
        let mut set = MeasurementSet::new();
        set.add(MeasurementTarget::Voltage { bus: BusId::new(1) }, 1.07, 0.01);
        set.add(
            MeasurementTarget::ActivePower {
                branch: BranchId::new(1),
                side: Side::To,
            },
            -40.0,
            0.5,
        );

        let mut estimate = Estimate::new();
        estimate.set_bus(BusId::new(1), BusState::new(PerUnit(1.04), Radians(0.0)));
        estimate.set_branch(
            BranchId::new(1),
            BranchFlow {
                p_to: Megawatts(-41.0),
                ..Default::default()
            },
        );

        let residuals = compute_residuals(&set, &estimate).unwrap();
        assert!((residuals[0].normalized - 3.0).abs() < 1e-9);
        assert!((residuals[1].residual - 1.0).abs() < 1e-12);
        assert!((residuals[1].normalized - 2.0).abs() < 1e-12);

        let test = chi_square_test(&residuals);
        assert_eq!(test.dof, 2);
        assert!((test.statistic - 13.0).abs() < 1e-9);
        assert!((test.critical_value - 5.0).abs() < 1e-12);
        assert!(!test.passed);
    }

    #[test]
    fn missing_estimate_is_an_error() {
        let mut set = MeasurementSet::new();
        set.add(MeasurementTarget::Voltage { bus: BusId::new(7) }, 1.0, 0.01);
        let err = compute_residuals(&set, &Estimate::new()).unwrap_err();
        assert!(matches!(err, GridError::IncompleteEstimate(_)));
    }
}
