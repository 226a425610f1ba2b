//! Heuristic observability scoring.
//!
//! [`score`] needs no solver. It checks four independent conditions against fixed
//! thresholds, derives a verdict from how many failed or warned, and lists the
//! measurements whose loss would leave a quantity unobserved.
//!
//! | # | condition | pass | warning | fail |
//! |---|-----------|------|---------|------|
//! | 1 | measurements vs. state variables (2n − 1) | ≥ | | < |
//! | 2 | voltage coverage | ≥ 50% | ≥ 25% | < 25% |
//! | 3 | power-flow coverage (branch ends) | ≥ 30% | > 0 | 0 |
//! | 4 | bus coverage (direct or via measured live branch) | ≥ 70% | ≥ 30% | < 30% |

use std::collections::{BTreeMap, HashMap, HashSet};

use gridwatch_core::{
    build_connectivity, BranchId, BusId, ElementRef, GridError, GridResult, KindCounts, Link,
    MeasurementId, MeasurementKind, MeasurementSet, MeasurementTarget, Network, Side,
};
use serde::Serialize;
use tracing::info;

pub const VOLTAGE_COVERAGE_PASS: f64 = 0.5;
pub const VOLTAGE_COVERAGE_WARN: f64 = 0.25;
pub const FLOW_COVERAGE_PASS: f64 = 0.3;
pub const BUS_COVERAGE_PASS: f64 = 0.7;
pub const BUS_COVERAGE_WARN: f64 = 0.3;
/// Attributed measurements for a bus to count as well-measured
pub const WELL_MEASURED_MIN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionStatus {
    Pass,
    Warning,
    Fail,
}

impl ConditionStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            ConditionStatus::Pass => "✅",
            ConditionStatus::Warning => "⚠",
            ConditionStatus::Fail => "❌",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionResult {
    pub name: &'static str,
    pub status: ConditionStatus,
    /// Observed ratio (or count for the measurement-count condition)
    pub value: f64,
    /// Value needed to pass
    pub required: f64,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservabilityVerdict {
    FullyObservable,
    LikelyObservable,
    PartiallyObservable,
    NotObservable,
}

impl ObservabilityVerdict {
    pub fn from_counts(errors: usize, warnings: usize) -> Self {
        match (errors, warnings) {
            (0, 0) => ObservabilityVerdict::FullyObservable,
            (0, _) => ObservabilityVerdict::LikelyObservable,
            (1, _) => ObservabilityVerdict::PartiallyObservable,
            _ => ObservabilityVerdict::NotObservable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservabilityVerdict::FullyObservable => "fully observable",
            ObservabilityVerdict::LikelyObservable => "likely observable",
            ObservabilityVerdict::PartiallyObservable => "partially observable",
            ObservabilityVerdict::NotObservable => "not observable",
        }
    }
}

impl std::fmt::Display for ObservabilityVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only measurement of its kind on its element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalMeasurement {
    pub id: MeasurementId,
    pub kind: MeasurementKind,
    pub element: ElementRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservabilityReport {
    pub num_buses: usize,
    pub num_branches: usize,
    pub num_measurements: usize,
    pub counts: KindCounts,
    pub state_variables: usize,
    pub redundancy_ratio: f64,
    pub voltage_coverage: f64,
    pub flow_coverage: f64,
    pub bus_coverage: f64,
    pub conditions: Vec<ConditionResult>,
    pub errors: usize,
    pub warnings: usize,
    pub verdict: ObservabilityVerdict,
    pub critical_measurements: Vec<CriticalMeasurement>,
    pub well_measured_buses: Vec<BusId>,
    pub unmeasured_buses: Vec<BusId>,
    pub recommendations: Vec<String>,
}

/// 2·buses − 1 (one angle reference); zero for an empty grid.
pub fn state_variable_count(num_buses: usize) -> usize {
    (2 * num_buses).saturating_sub(1)
}

pub fn redundancy_ratio(num_measurements: usize, num_buses: usize) -> f64 {
    match state_variable_count(num_buses) {
        0 => 0.0,
        n => num_measurements as f64 / n as f64,
    }
}

/// Buses of `network` carrying at least one voltage measurement.
fn voltage_buses(network: &Network, measurements: &MeasurementSet) -> HashSet<BusId> {
    measurements
        .iter()
        .filter_map(|m| match m.target {
            MeasurementTarget::Voltage { bus } if network.contains_bus(bus) => Some(bus),
            _ => None,
        })
        .collect()
}

/// Branches of `network` carrying at least one flow measurement.
fn measured_branches(network: &Network, measurements: &MeasurementSet) -> HashSet<BranchId> {
    measurements
        .iter()
        .filter_map(|m| m.target.branch())
        .filter(|b| network.branch(*b).is_some())
        .collect()
}

/// Distinct buses with a voltage measurement over all buses.
pub fn voltage_coverage(network: &Network, measurements: &MeasurementSet) -> f64 {
    match network.bus_count() {
        0 => 0.0,
        n => voltage_buses(network, measurements).len() as f64 / n as f64,
    }
}

/// Distinct (branch, side) slots carrying P or Q over 2·branches; 1.0 with no branches.
pub fn flow_coverage(network: &Network, measurements: &MeasurementSet) -> f64 {
    if network.branch_count() == 0 {
        return 1.0;
    }
    let slots: HashSet<(BranchId, Side)> = measurements
        .iter()
        .filter_map(|m| Some((m.target.branch()?, m.target.side()?)))
        .filter(|(b, _)| network.branch(*b).is_some())
        .collect();
    slots.len() as f64 / (2 * network.branch_count()) as f64
}

fn grade(value: f64, pass: f64, warn: impl Fn(f64) -> bool) -> ConditionStatus {
    if value >= pass {
        ConditionStatus::Pass
    } else if warn(value) {
        ConditionStatus::Warning
    } else {
        ConditionStatus::Fail
    }
}

fn pct(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

pub fn score(network: &Network, measurements: &MeasurementSet) -> GridResult<ObservabilityReport> {
    let num_buses = network.bus_count();
    if num_buses == 0 {
        return Err(GridError::Configuration(
            "cannot score observability of an empty grid".to_string(),
        ));
    }
    let num_branches = network.branch_count();
    let num_measurements = measurements.len();
    let state_variables = state_variable_count(num_buses);

    let graph = build_connectivity(network);
    let with_voltage = voltage_buses(network, measurements);
    let measured = measured_branches(network, measurements);

    // a bus is reached through any live branch at it that carries a flow measurement
    let reached = |bus: BusId| {
        graph
            .links_at(bus)
            .iter()
            .any(|link| matches!(link, Link::Branch(b) if measured.contains(b)))
    };
    let mut unmeasured_buses = Vec::new();
    for bus in network.buses() {
        if !with_voltage.contains(&bus.id) && !reached(bus.id) {
            unmeasured_buses.push(bus.id);
        }
    }
    unmeasured_buses.sort();

    let v_cov = voltage_coverage(network, measurements);
    let f_cov = flow_coverage(network, measurements);
    let b_cov = (num_buses - unmeasured_buses.len()) as f64 / num_buses as f64;

    let conditions = vec![
        ConditionResult {
            name: "measurement count",
            status: if num_measurements >= state_variables {
                ConditionStatus::Pass
            } else {
                ConditionStatus::Fail
            },
            value: num_measurements as f64,
            required: state_variables as f64,
            detail: format!(
                "{} measurements for {} state variables",
                num_measurements, state_variables
            ),
        },
        ConditionResult {
            name: "voltage coverage",
            status: grade(v_cov, VOLTAGE_COVERAGE_PASS, |v| v >= VOLTAGE_COVERAGE_WARN),
            value: v_cov,
            required: VOLTAGE_COVERAGE_PASS,
            detail: format!(
                "{} of {} buses have a voltage measurement ({})",
                with_voltage.len(),
                num_buses,
                pct(v_cov)
            ),
        },
        ConditionResult {
            name: "power-flow coverage",
            status: if num_branches == 0 {
                ConditionStatus::Pass
            } else {
                grade(f_cov, FLOW_COVERAGE_PASS, |v| v > 0.0)
            },
            value: f_cov,
            required: FLOW_COVERAGE_PASS,
            detail: format!("{} of branch ends carry a flow measurement", pct(f_cov)),
        },
        ConditionResult {
            name: "bus coverage",
            status: grade(b_cov, BUS_COVERAGE_PASS, |v| v >= BUS_COVERAGE_WARN),
            value: b_cov,
            required: BUS_COVERAGE_PASS,
            detail: format!(
                "{} buses measured directly or through a measured branch",
                pct(b_cov)
            ),
        },
    ];
    let errors = conditions
        .iter()
        .filter(|c| c.status == ConditionStatus::Fail)
        .count();
    let warnings = conditions
        .iter()
        .filter(|c| c.status == ConditionStatus::Warning)
        .count();
    let verdict = ObservabilityVerdict::from_counts(errors, warnings);

    let critical_measurements = critical_measurements(measurements);
    let well_measured_buses = well_measured_buses(network, measurements);

    let mut report = ObservabilityReport {
        num_buses,
        num_branches,
        num_measurements,
        counts: measurements.count_by_kind(),
        state_variables,
        redundancy_ratio: redundancy_ratio(num_measurements, num_buses),
        voltage_coverage: v_cov,
        flow_coverage: f_cov,
        bus_coverage: b_cov,
        conditions,
        errors,
        warnings,
        verdict,
        critical_measurements,
        well_measured_buses,
        unmeasured_buses,
        recommendations: Vec::new(),
    };
    report.recommendations = recommendations(&report);
    info!(
        verdict = report.verdict.as_str(),
        errors = report.errors,
        warnings = report.warnings,
        redundancy = report.redundancy_ratio,
        "observability scored"
    );
    Ok(report)
}

/// Measurements that are alone in their (kind, element) group, ordered by id.
fn critical_measurements(measurements: &MeasurementSet) -> Vec<CriticalMeasurement> {
    let mut groups: BTreeMap<(MeasurementKind, ElementRef), Vec<MeasurementId>> = BTreeMap::new();
    for m in measurements.iter() {
        groups
            .entry((m.kind(), m.target.element()))
            .or_default()
            .push(m.id);
    }
    let mut critical: Vec<CriticalMeasurement> = groups
        .into_iter()
        .filter_map(|((kind, element), ids)| match ids.as_slice() {
            [only] => Some(CriticalMeasurement {
                id: *only,
                kind,
                element,
            }),
            _ => None,
        })
        .collect();
    critical.sort_by_key(|c| c.id);
    critical
}

/// Buses with at least [`WELL_MEASURED_MIN`] attributed measurements: voltages at the
/// bus plus flows taken at the bus's end of a branch.
fn well_measured_buses(network: &Network, measurements: &MeasurementSet) -> Vec<BusId> {
    let mut per_bus: HashMap<BusId, usize> = HashMap::new();
    for m in measurements.iter() {
        let bus = match m.target {
            MeasurementTarget::Voltage { bus } => Some(bus),
            MeasurementTarget::ActivePower { branch, side }
            | MeasurementTarget::ReactivePower { branch, side } => {
                network.branch(branch).map(|b| match side {
                    Side::From => b.from_bus,
                    Side::To => b.to_bus,
                })
            }
        };
        if let Some(bus) = bus.filter(|b| network.contains_bus(*b)) {
            *per_bus.entry(bus).or_default() += 1;
        }
    }
    let mut well: Vec<BusId> = per_bus
        .into_iter()
        .filter(|(_, n)| *n >= WELL_MEASURED_MIN)
        .map(|(bus, _)| bus)
        .collect();
    well.sort();
    well
}

fn recommendations(report: &ObservabilityReport) -> Vec<String> {
    let mut out = Vec::new();
    for condition in &report.conditions {
        if condition.status == ConditionStatus::Pass {
            continue;
        }
        let advice = match condition.name {
            "measurement count" => format!(
                "Add at least {} measurements to reach the {} state variables",
                report.state_variables - report.num_measurements,
                report.state_variables
            ),
            "voltage coverage" => format!(
                "Add voltage measurements: coverage is {}, target {}",
                pct(report.voltage_coverage),
                pct(VOLTAGE_COVERAGE_PASS)
            ),
            "power-flow coverage" => format!(
                "Add branch flow measurements: coverage is {}, target {}",
                pct(report.flow_coverage),
                pct(FLOW_COVERAGE_PASS)
            ),
            _ => format!(
                "Extend measurements to unmeasured buses: coverage is {}, target {}",
                pct(report.bus_coverage),
                pct(BUS_COVERAGE_PASS)
            ),
        };
        out.push(format!("{} {}", condition.status.symbol(), advice));
    }
    if !report.critical_measurements.is_empty() {
        out.push(format!(
            "{} critical measurement(s) have no redundancy; losing one leaves its quantity unobserved",
            report.critical_measurements.len()
        ));
    }
    if !report.unmeasured_buses.is_empty() {
        let ids: Vec<String> = report
            .unmeasured_buses
            .iter()
            .map(|b| b.value().to_string())
            .collect();
        out.push(format!("Unmeasured bus(es): {}", ids.join(", ")));
    }
    if report.redundancy_ratio < 1.5 {
        out.push(format!(
            "Redundancy ratio {:.2} is low for bad-data detection; 1.5 or more is advisable",
            report.redundancy_ratio
        ));
    }
    if out.is_empty() {
        out.push("Measurement configuration looks adequate".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwatch_core::{Branch, Bus, Kilovolts, Switch, SwitchElement, SwitchId};

    fn three_bus() -> Network {
        let mut net = Network::new();
        for id in 0..3 {
            net.add_bus(Bus::new(BusId::new(id), Kilovolts(110.0))).unwrap();
        }
        net.add_branch(Branch::line(BranchId::new(0), BusId::new(0), BusId::new(1)))
            .unwrap();
        net.add_branch(Branch::line(BranchId::new(1), BusId::new(1), BusId::new(2)))
            .unwrap();
        net
    }

    fn flow(branch: usize, side: Side) -> MeasurementTarget {
        MeasurementTarget::ActivePower {
            branch: BranchId::new(branch),
            side,
        }
    }

    #[test]
    fn empty_grid_is_configuration_error() {
        let err = score(&Network::new(), &MeasurementSet::new()).unwrap_err();
        assert!(matches!(err, GridError::Configuration(_)));
    }

    #[test]
    fn verdict_from_counts() {
        use ObservabilityVerdict::*;
        assert_eq!(ObservabilityVerdict::from_counts(0, 0), FullyObservable);
        assert_eq!(ObservabilityVerdict::from_counts(0, 3), LikelyObservable);
        assert_eq!(ObservabilityVerdict::from_counts(1, 2), PartiallyObservable);
        assert_eq!(ObservabilityVerdict::from_counts(2, 0), NotObservable);
    }

    #[test]
    fn no_measurements_is_not_observable() {
        let report = score(&three_bus(), &MeasurementSet::new()).unwrap();
        assert_eq!(report.state_variables, 5);
        assert_eq!(report.errors, 4);
        assert_eq!(report.verdict, ObservabilityVerdict::NotObservable);
        assert_eq!(report.unmeasured_buses.len(), 3);
    }

    #[test]
    fn voltage_coverage_bands() {
        let net = three_bus();
        let mut set = MeasurementSet::new();
        set.add(MeasurementTarget::Voltage { bus: BusId::new(0) }, 1.0, 0.01);
        let report = score(&net, &set).unwrap();
        assert_eq!(report.conditions[1].status, ConditionStatus::Warning);

        set.add(MeasurementTarget::Voltage { bus: BusId::new(1) }, 1.0, 0.01);
        // duplicates do not raise coverage
        set.add(MeasurementTarget::Voltage { bus: BusId::new(1) }, 1.0, 0.01);
        let report = score(&net, &set).unwrap();
        assert_eq!(report.conditions[1].status, ConditionStatus::Pass);
        assert!((report.voltage_coverage - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn voltage_coverage_band_edges() {
        let mut net = Network::new();
        for id in 0..5 {
            net.add_bus(Bus::new(BusId::new(id), Kilovolts(110.0))).unwrap();
        }
        let mut set = MeasurementSet::new();
        set.add(MeasurementTarget::Voltage { bus: BusId::new(0) }, 1.0, 0.01);
        // 1 of 5
        let report = score(&net, &set).unwrap();
        assert_eq!(report.conditions[1].status, ConditionStatus::Fail);

        let mut four = Network::new();
        for id in 0..4 {
            four.add_bus(Bus::new(BusId::new(id), Kilovolts(110.0))).unwrap();
        }
        // 1 of 4 sits on the warning edge
        let report = score(&four, &set).unwrap();
        assert_eq!(report.voltage_coverage, 0.25);
        assert_eq!(report.conditions[1].status, ConditionStatus::Warning);

        // 2 of 4 sits on the pass edge
        set.add(MeasurementTarget::Voltage { bus: BusId::new(1) }, 1.0, 0.01);
        let report = score(&four, &set).unwrap();
        assert_eq!(report.voltage_coverage, 0.5);
        assert_eq!(report.conditions[1].status, ConditionStatus::Pass);

        let report = score(&four, &MeasurementSet::new()).unwrap();
        assert_eq!(report.conditions[1].status, ConditionStatus::Fail);
    }

    #[test]
    fn flow_coverage_counts_branch_ends() {
        let net = three_bus();
        let mut set = MeasurementSet::new();
        set.add(flow(0, Side::From), 10.0, 0.5);
        set.add(
            MeasurementTarget::ReactivePower {
                branch: BranchId::new(0),
                side: Side::From,
            },
            2.0,
            0.5,
        );
        let report = score(&net, &set).unwrap();
        assert!((report.flow_coverage - 0.25).abs() < 1e-12);
        assert_eq!(report.conditions[2].status, ConditionStatus::Warning);
    }

    #[test]
    fn open_switch_leaves_bus_unmeasured() {
        let mut net = three_bus();
        net.add_switch(Switch::new(
            SwitchId::new(0),
            BusId::new(1),
            SwitchElement::Line(BranchId::new(1)),
        ))
        .unwrap();
        let mut set = MeasurementSet::new();
        set.add(flow(1, Side::From), 10.0, 0.5);
        let report = score(&net, &set).unwrap();
        assert_eq!(report.unmeasured_buses, vec![BusId::new(0)]);

        net.set_switch_state(SwitchId::new(0), false).unwrap();
        let report = score(&net, &set).unwrap();
        assert_eq!(
            report.unmeasured_buses,
            vec![BusId::new(0), BusId::new(1), BusId::new(2)]
        );
    }

    #[test]
    fn critical_and_well_measured() {
        let net = three_bus();
        let mut set = MeasurementSet::new();
        let v1 = set.add(MeasurementTarget::Voltage { bus: BusId::new(1) }, 1.0, 0.01);
        set.add(flow(0, Side::To), -10.0, 0.5);
        set.add(flow(1, Side::From), 10.0, 0.5);
        set.add(flow(1, Side::To), -10.0, 0.5);

        let report = score(&net, &set).unwrap();
        // bus 1: its voltage, branch 0 at the to end, branch 1 at the from end
        assert_eq!(report.well_measured_buses, vec![BusId::new(1)]);
        let ids: Vec<MeasurementId> = report.critical_measurements.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![v1, MeasurementId::new(1)]);
    }

    #[test]
    fn redundancy_ratio_guards_empty_grid() {
        assert_eq!(redundancy_ratio(10, 0), 0.0);
        assert!((redundancy_ratio(10, 3) - 2.0).abs() < 1e-12);
    }
}
