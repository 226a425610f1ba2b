//! Solver-free plausibility checks on a measurement set.
//!
//! Each check looks at raw readings only: values outside physical limits, broken
//! uncertainties, branch end flows that contradict each other, implausible voltage
//! steps across a live branch, duplicate readings that disagree, and measurements
//! pointing at elements the grid does not have.

use std::collections::{BTreeMap, HashMap};

use gridwatch_core::{
    BranchId, BusId, ElementRef, GridError, GridResult, Measurement, MeasurementId,
    MeasurementSet, MeasurementTarget, Network, Side,
};
use serde::Serialize;
use tracing::info;

use crate::config::ConsistencyConfig;
use crate::observability::{flow_coverage, redundancy_ratio, voltage_coverage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationCategory {
    PhysicalLimits,
    InvalidUncertainty,
    FlowPair,
    VoltageGradient,
    DuplicateDisagreement,
    DanglingReference,
}

impl ViolationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCategory::PhysicalLimits => "physical-limits",
            ViolationCategory::InvalidUncertainty => "invalid-uncertainty",
            ViolationCategory::FlowPair => "flow-pair",
            ViolationCategory::VoltageGradient => "voltage-gradient",
            ViolationCategory::DuplicateDisagreement => "duplicate-disagreement",
            ViolationCategory::DanglingReference => "dangling-reference",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub category: ViolationCategory,
    /// Measurements involved, ordered by id
    pub measurements: Vec<MeasurementId>,
    pub element: ElementRef,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStatus {
    Consistent,
    MinorIssues,
    ModerateIssues,
    MajorIssues,
}

impl ConsistencyStatus {
    pub fn from_violations(total: usize) -> Self {
        match total {
            0 => ConsistencyStatus::Consistent,
            1..=2 => ConsistencyStatus::MinorIssues,
            3..=5 => ConsistencyStatus::ModerateIssues,
            _ => ConsistencyStatus::MajorIssues,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsistencyMetrics {
    pub voltage_coverage: f64,
    pub flow_coverage: f64,
    pub redundancy_ratio: f64,
    /// Measurements per bus
    pub measurement_density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub status: ConsistencyStatus,
    pub total_violations: usize,
    pub by_category: BTreeMap<ViolationCategory, usize>,
    pub violations: Vec<Violation>,
    pub metrics: ConsistencyMetrics,
    pub recommendations: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.status == ConsistencyStatus::Consistent
    }

    pub fn count(&self, category: ViolationCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }
}

fn references_grid(network: &Network, target: &MeasurementTarget) -> bool {
    match target.element() {
        ElementRef::Bus(bus) => network.contains_bus(bus),
        ElementRef::Branch(branch) => network.branch(branch).is_some(),
    }
}

fn has_valid_numbers(m: &Measurement) -> bool {
    m.value.is_finite() && m.sigma.is_finite() && m.sigma > 0.0
}

pub fn check_consistency(
    network: &Network,
    measurements: &MeasurementSet,
    config: &ConsistencyConfig,
) -> GridResult<ConsistencyReport> {
    if network.bus_count() == 0 {
        return Err(GridError::Configuration(
            "cannot check consistency against an empty grid".to_string(),
        ));
    }

    let mut violations = Vec::new();
    // readings that survive the per-measurement checks feed the cross checks
    let mut usable: Vec<&Measurement> = Vec::new();

    for m in measurements.iter() {
        let element = m.target.element();
        if !references_grid(network, &m.target) {
            violations.push(Violation {
                category: ViolationCategory::DanglingReference,
                measurements: vec![m.id],
                element,
                message: format!("{} targets {} which is not in the grid", m.id, element),
            });
            continue;
        }
        if !has_valid_numbers(m) {
            violations.push(Violation {
                category: ViolationCategory::InvalidUncertainty,
                measurements: vec![m.id],
                element,
                message: format!("{} has value {} with sigma {}", m.id, m.value, m.sigma),
            });
            continue;
        }
        if let Some(message) = physical_limit_breach(m, config) {
            violations.push(Violation {
                category: ViolationCategory::PhysicalLimits,
                measurements: vec![m.id],
                element,
                message,
            });
        }
        usable.push(m);
    }

    check_duplicates(&usable, &mut violations);
    check_flow_pairs(&usable, config, &mut violations);
    check_voltage_gradients(network, &usable, config, &mut violations);

    let mut by_category = BTreeMap::new();
    for v in &violations {
        *by_category.entry(v.category).or_insert(0) += 1;
    }
    let total_violations = violations.len();
    let num_buses = network.bus_count();
    let metrics = ConsistencyMetrics {
        voltage_coverage: voltage_coverage(network, measurements),
        flow_coverage: flow_coverage(network, measurements),
        redundancy_ratio: redundancy_ratio(measurements.len(), num_buses),
        measurement_density: measurements.len() as f64 / num_buses as f64,
    };
    let status = ConsistencyStatus::from_violations(total_violations);
    let recommendations = recommendations(&by_category);

    info!(
        status = ?status,
        violations = total_violations,
        "consistency checked"
    );
    Ok(ConsistencyReport {
        status,
        total_violations,
        by_category,
        violations,
        metrics,
        recommendations,
    })
}

fn physical_limit_breach(m: &Measurement, config: &ConsistencyConfig) -> Option<String> {
    match m.target {
        MeasurementTarget::Voltage { .. } => {
            if m.value < config.voltage_min_pu || m.value > config.voltage_max_pu {
                Some(format!(
                    "{}: voltage {:.4} pu outside [{}, {}]",
                    m.id, m.value, config.voltage_min_pu, config.voltage_max_pu
                ))
            } else {
                None
            }
        }
        MeasurementTarget::ActivePower { .. } if m.value.abs() > config.max_flow_mw => Some(
            format!("{}: |P| = {:.1} MW exceeds {}", m.id, m.value.abs(), config.max_flow_mw),
        ),
        MeasurementTarget::ReactivePower { .. } if m.value.abs() > config.max_flow_mvar => {
            Some(format!(
                "{}: |Q| = {:.1} Mvar exceeds {}",
                m.id,
                m.value.abs(),
                config.max_flow_mvar
            ))
        }
        _ => None,
    }
}

/// Same quantity measured twice with readings further apart than 3·√(σ₁² + σ₂²).
fn check_duplicates(usable: &[&Measurement], violations: &mut Vec<Violation>) {
    let mut groups: BTreeMap<MeasurementTarget, Vec<&Measurement>> = BTreeMap::new();
    for &m in usable {
        groups.entry(m.target).or_default().push(m);
    }
    for (target, group) in groups {
        for (i, a) in group.iter().enumerate() {
            for b in &group[i + 1..] {
                let bound = 3.0 * (a.sigma * a.sigma + b.sigma * b.sigma).sqrt();
                let gap = (a.value - b.value).abs();
                if gap > bound {
                    violations.push(Violation {
                        category: ViolationCategory::DuplicateDisagreement,
                        measurements: vec![a.id, b.id],
                        element: target.element(),
                        message: format!(
                            "{} and {} of {} differ by {:.4} (allowed {:.4})",
                            a.id, b.id, target, gap, bound
                        ),
                    });
                }
            }
        }
    }
}

/// Active power at both ends of a branch: direction and implied loss.
fn check_flow_pairs(
    usable: &[&Measurement],
    config: &ConsistencyConfig,
    violations: &mut Vec<Violation>,
) {
    // first (lowest id) reading per branch end
    let mut ends: BTreeMap<BranchId, (Option<&Measurement>, Option<&Measurement>)> =
        BTreeMap::new();
    for &m in usable {
        if let MeasurementTarget::ActivePower { branch, side } = m.target {
            let entry = ends.entry(branch).or_default();
            let slot = match side {
                Side::From => &mut entry.0,
                Side::To => &mut entry.1,
            };
            slot.get_or_insert(m);
        }
    }

    for (branch, pair) in ends {
        let (Some(from), Some(to)) = pair else {
            continue;
        };
        let (pf, pt) = (from.value, to.value);
        let both_significant = pf.abs() > config.tolerance && pt.abs() > config.tolerance;
        let message = if both_significant && pf.signum() == pt.signum() {
            Some(format!(
                "{} reports {:.2} MW at the from end and {:.2} MW at the to end: power cannot flow out of both ends",
                branch, pf, pt
            ))
        } else {
            let loss = (pf + pt).abs();
            let allowed = config.loss_fraction * pf.abs().max(pt.abs()) + from.sigma + to.sigma;
            (loss > allowed).then(|| {
                format!(
                    "{} implies {:.2} MW of loss (allowed {:.2})",
                    branch, loss, allowed
                )
            })
        };
        if let Some(message) = message {
            violations.push(Violation {
                category: ViolationCategory::FlowPair,
                measurements: vec![from.id, to.id],
                element: ElementRef::Branch(branch),
                message,
            });
        }
    }
}

/// Voltage magnitude step across each live branch with both ends measured.
fn check_voltage_gradients(
    network: &Network,
    usable: &[&Measurement],
    config: &ConsistencyConfig,
    violations: &mut Vec<Violation>,
) {
    let mut voltage_at: HashMap<BusId, &Measurement> = HashMap::new();
    for &m in usable {
        if let MeasurementTarget::Voltage { bus } = m.target {
            voltage_at.entry(bus).or_insert(m);
        }
    }
    for branch in network.branches() {
        if !network.is_energized(branch.id) {
            continue;
        }
        let (Some(a), Some(b)) = (voltage_at.get(&branch.from_bus), voltage_at.get(&branch.to_bus))
        else {
            continue;
        };
        let step = (a.value - b.value).abs();
        if step > config.max_voltage_step_pu {
            violations.push(Violation {
                category: ViolationCategory::VoltageGradient,
                measurements: vec![a.id, b.id],
                element: ElementRef::Branch(branch.id),
                message: format!(
                    "{}: voltage differs by {:.4} pu between {} and {} (allowed {})",
                    branch.id, step, branch.from_bus, branch.to_bus, config.max_voltage_step_pu
                ),
            });
        }
    }
}

fn recommendations(by_category: &BTreeMap<ViolationCategory, usize>) -> Vec<String> {
    let mut out = Vec::new();
    for (category, count) in by_category {
        let advice = match category {
            ViolationCategory::PhysicalLimits => {
                "Check sensor calibration and scaling for readings outside physical limits"
            }
            ViolationCategory::InvalidUncertainty => {
                "Assign a positive, finite standard deviation to every measurement"
            }
            ViolationCategory::FlowPair => {
                "Verify current transformer polarity and metering on branches with contradicting end flows"
            }
            ViolationCategory::VoltageGradient => {
                "Check voltage transformers on buses with implausible voltage steps"
            }
            ViolationCategory::DuplicateDisagreement => {
                "Investigate redundant sensors that disagree beyond their uncertainty"
            }
            ViolationCategory::DanglingReference => {
                "Remove or re-map measurements that point at elements missing from the grid"
            }
        };
        out.push(format!("{} ({} {})", advice, count, category.as_str()));
    }
    if out.is_empty() {
        out.push("Measurements are mutually consistent".to_string());
    }
    out
}
