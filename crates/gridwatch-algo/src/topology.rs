//! Island and connectivity analysis under live switch states.
//!
//! [`analyze`] rebuilds the switch-aware graph and classifies what it sees: islands,
//! isolated and radial buses, and the structural effect of every open switch.
//! [`toggle_switch`] and [`set_branch_in_service`] apply a change, re-run the
//! analysis and roll the change back if it newly isolates a bus.

use std::collections::BTreeSet;

use gridwatch_core::{
    build_connectivity, BranchId, BusId, DegreeStats, GridError, GridResult, Island, Network,
    SwitchElement, SwitchId,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    NoNetwork,
    Connected,
    Islanded,
    Fragmented,
}

impl ConnectivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityStatus::NoNetwork => "no_network",
            ConnectivityStatus::Connected => "connected",
            ConnectivityStatus::Islanded => "islanded",
            ConnectivityStatus::Fragmented => "fragmented",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchSeverity {
    /// Bus-sectioning switch
    Medium,
    /// Disconnects a line or transformer
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchImpact {
    /// The element's endpoints now lie in different islands
    SplitsNetwork,
    /// The endpoints are still connected through other paths
    RedundantPath,
}

/// An open switch and what opening it does to the grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchIssue {
    pub switch: SwitchId,
    pub name: Option<String>,
    pub element: SwitchElement,
    pub endpoints: (BusId, BusId),
    pub severity: SwitchSeverity,
    pub impact: SwitchImpact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RadialBus {
    pub bus: BusId,
    pub neighbor: BusId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyReport {
    pub islands: Vec<Island>,
    pub isolated_buses: Vec<BusId>,
    pub radial_buses: Vec<RadialBus>,
    pub switch_issues: Vec<SwitchIssue>,
    pub degree_stats: DegreeStats,
    pub connectivity_status: ConnectivityStatus,
    pub overall_status: OverallStatus,
    pub recommendations: Vec<String>,
}

impl TopologyReport {
    pub fn island_count(&self) -> usize {
        self.islands.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity_status == ConnectivityStatus::Connected
    }
}

/// Endpoints of the element a switch controls. `None` for a dangling element.
fn switch_endpoints(
    network: &Network,
    switch_bus: BusId,
    element: SwitchElement,
) -> Option<(BusId, BusId)> {
    match element {
        SwitchElement::Line(id) | SwitchElement::Transformer(id) => {
            network.branch(id).map(|b| (b.from_bus, b.to_bus))
        }
        SwitchElement::Bus(other) => Some((switch_bus, other)),
    }
}

pub fn analyze(network: &Network) -> TopologyReport {
    let graph = build_connectivity(network);
    let islands = graph.islands();
    let isolated_buses = graph.isolated_buses();
    let radial_buses: Vec<RadialBus> = graph
        .radial_buses()
        .into_iter()
        .map(|(bus, neighbor)| RadialBus { bus, neighbor })
        .collect();
    let island_of = graph.island_map();

    let mut switch_issues = Vec::new();
    for switch in network.switches().iter().filter(|s| !s.closed) {
        let Some((a, b)) = switch_endpoints(network, switch.bus, switch.element) else {
            continue;
        };
        let severity = match switch.element {
            SwitchElement::Line(_) | SwitchElement::Transformer(_) => SwitchSeverity::High,
            SwitchElement::Bus(_) => SwitchSeverity::Medium,
        };
        let impact = if island_of.get(&a) == island_of.get(&b) {
            SwitchImpact::RedundantPath
        } else {
            SwitchImpact::SplitsNetwork
        };
        switch_issues.push(SwitchIssue {
            switch: switch.id,
            name: switch.name.clone(),
            element: switch.element,
            endpoints: (a, b),
            severity,
            impact,
        });
    }

    let connectivity_status = if network.bus_count() == 0 {
        ConnectivityStatus::NoNetwork
    } else if !isolated_buses.is_empty() {
        ConnectivityStatus::Fragmented
    } else if islands.len() > 1 {
        ConnectivityStatus::Islanded
    } else {
        ConnectivityStatus::Connected
    };
    let overall_status = match connectivity_status {
        ConnectivityStatus::Connected => OverallStatus::Healthy,
        ConnectivityStatus::Islanded => OverallStatus::Warning,
        _ => OverallStatus::Critical,
    };

    let mut report = TopologyReport {
        islands,
        isolated_buses,
        radial_buses,
        switch_issues,
        degree_stats: graph.degree_stats(),
        connectivity_status,
        overall_status,
        recommendations: Vec::new(),
    };
    report.recommendations = recommendations(&report);
    info!(
        status = report.connectivity_status.as_str(),
        islands = report.island_count(),
        open_switches = report.switch_issues.len(),
        "topology analyzed"
    );
    report
}

fn join_ids<T: std::fmt::Display>(ids: impl IntoIterator<Item = T>) -> String {
    ids.into_iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn recommendations(report: &TopologyReport) -> Vec<String> {
    let mut out = Vec::new();
    match report.connectivity_status {
        ConnectivityStatus::NoNetwork => {
            out.push("Load a grid model before running topology analysis".to_string());
            return out;
        }
        ConnectivityStatus::Fragmented => out.push(format!(
            "Reconnect isolated bus(es) {}: their state cannot be estimated",
            join_ids(report.isolated_buses.iter().map(|b| b.value()))
        )),
        ConnectivityStatus::Islanded => out.push(format!(
            "Network is split into {} islands; each island needs its own voltage reference and measurements",
            report.island_count()
        )),
        ConnectivityStatus::Connected => {}
    }

    let splitting: Vec<usize> = report
        .switch_issues
        .iter()
        .filter(|i| i.impact == SwitchImpact::SplitsNetwork)
        .map(|i| i.switch.value())
        .collect();
    if !splitting.is_empty() {
        out.push(format!(
            "Review open switch(es) {}: closing them would reconnect the network",
            join_ids(&splitting)
        ));
    }

    let high_redundant = report
        .switch_issues
        .iter()
        .filter(|i| i.severity == SwitchSeverity::High && i.impact == SwitchImpact::RedundantPath)
        .count();
    if high_redundant > 0 {
        out.push(format!(
            "{} open branch switch(es) reduce redundancy without splitting the network",
            high_redundant
        ));
    }

    if !report.radial_buses.is_empty() {
        out.push(format!(
            "Radial bus(es) {} hang on a single connection; place measurements there to avoid critical measurements",
            join_ids(report.radial_buses.iter().map(|r| r.bus.value()))
        ));
    }

    if out.is_empty() {
        out.push("Topology is healthy: single island with no open switches".to_string());
    }
    out
}

/// Result of a transactional switching action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SwitchingOutcome {
    /// The change stays applied.
    Committed {
        previous: bool,
        current: bool,
        report: TopologyReport,
        warnings: Vec<String>,
    },
    /// The change would have isolated `newly_isolated`; it was rolled back.
    Rejected { newly_isolated: Vec<BusId> },
}

impl SwitchingOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SwitchingOutcome::Committed { .. })
    }

    /// Turn a rejection into [`GridError::TopologyRejected`].
    pub fn into_result(self) -> GridResult<TopologyReport> {
        match self {
            SwitchingOutcome::Committed { report, .. } => Ok(report),
            SwitchingOutcome::Rejected { newly_isolated } => Err(GridError::TopologyRejected {
                buses: newly_isolated.iter().map(|b| b.value()).collect(),
            }),
        }
    }
}

/// Apply a state change and keep it unless it isolates a bus that was connected
/// before. `apply` returns the previous state and is called again with it to roll back.
fn transactional(
    network: &mut Network,
    target: bool,
    apply: impl Fn(&mut Network, bool) -> GridResult<bool>,
) -> GridResult<SwitchingOutcome> {
    let before = analyze(network);
    let was_isolated: BTreeSet<BusId> = before.isolated_buses.iter().copied().collect();

    let previous = apply(network, target)?;
    let after = analyze(network);
    let newly_isolated: Vec<BusId> = after
        .isolated_buses
        .iter()
        .copied()
        .filter(|b| !was_isolated.contains(b))
        .collect();

    if !newly_isolated.is_empty() {
        apply(network, previous)?;
        warn!(
            buses = %join_ids(newly_isolated.iter().map(|b| b.value())),
            "switching rejected, would isolate buses"
        );
        return Ok(SwitchingOutcome::Rejected { newly_isolated });
    }

    let mut warnings = Vec::new();
    if after.island_count() > before.island_count() {
        let msg = format!(
            "Network split from {} into {} islands",
            before.island_count(),
            after.island_count()
        );
        warn!("{}", msg);
        warnings.push(msg);
    }
    Ok(SwitchingOutcome::Committed {
        previous,
        current: target,
        report: after,
        warnings,
    })
}

/// Flip a switch (`force_state = None`) or force it open/closed.
pub fn toggle_switch(
    network: &mut Network,
    id: SwitchId,
    force_state: Option<bool>,
) -> GridResult<SwitchingOutcome> {
    let current = network
        .switch(id)
        .map(|s| s.closed)
        .ok_or(GridError::UnknownElement {
            kind: "switch",
            id: id.value(),
        })?;
    let target = force_state.unwrap_or(!current);
    info!(switch = %id, closed = target, "switching");
    transactional(network, target, |net, closed| net.set_switch_state(id, closed))
}

pub fn set_branch_in_service(
    network: &mut Network,
    id: BranchId,
    in_service: bool,
) -> GridResult<SwitchingOutcome> {
    if network.branch(id).is_none() {
        return Err(GridError::UnknownElement {
            kind: "branch",
            id: id.value(),
        });
    }
    info!(branch = %id, in_service, "changing branch service state");
    transactional(network, in_service, |net, state| {
        net.set_branch_in_service(id, state)
    })
}

/// One row of the switch listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchInfo {
    pub id: SwitchId,
    pub name: Option<String>,
    pub bus: BusId,
    pub element: SwitchElement,
    pub closed: bool,
    /// Whether the controlled branch is live; `None` for bus switches
    pub element_energized: Option<bool>,
}

pub fn switch_info(network: &Network) -> Vec<SwitchInfo> {
    network
        .switches()
        .iter()
        .map(|s| SwitchInfo {
            id: s.id,
            name: s.name.clone(),
            bus: s.bus,
            element: s.element,
            closed: s.closed,
            element_energized: s.element.branch().map(|b| network.is_energized(b)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwatch_core::{Branch, Bus, Kilovolts, Switch};

    /// Ring 1-2-3-1 with a radial spur 3-4; every branch switched at its from-bus.
    fn ring_with_spur() -> Network {
        let mut net = Network::new();
        for id in 1..=4 {
            net.add_bus(Bus::new(BusId::new(id), Kilovolts(230.0))).unwrap();
        }
        for (id, a, b) in [(1, 1, 2), (2, 2, 3), (3, 3, 1), (4, 3, 4)] {
            net.add_branch(Branch::line(BranchId::new(id), BusId::new(a), BusId::new(b)))
                .unwrap();
            net.add_switch(Switch::new(
                SwitchId::new(id),
                BusId::new(a),
                SwitchElement::Line(BranchId::new(id)),
            ))
            .unwrap();
        }
        net
    }

    #[test]
    fn empty_network_is_no_network() {
        let report = analyze(&Network::new());
        assert_eq!(report.connectivity_status, ConnectivityStatus::NoNetwork);
        assert_eq!(report.overall_status, OverallStatus::Critical);
        assert!(report.islands.is_empty());
    }

    #[test]
    fn connected_ring_reports_radial_spur() {
        let report = analyze(&ring_with_spur());
        assert_eq!(report.connectivity_status, ConnectivityStatus::Connected);
        assert_eq!(report.overall_status, OverallStatus::Healthy);
        assert_eq!(
            report.radial_buses,
            vec![RadialBus {
                bus: BusId::new(4),
                neighbor: BusId::new(3)
            }]
        );
        assert!(report.switch_issues.is_empty());
    }

    #[test]
    fn branchless_bus_fragments_the_grid() {
        let mut net = ring_with_spur();
        net.add_bus(Bus::new(BusId::new(5), Kilovolts(230.0))).unwrap();
        let report = analyze(&net);
        assert_eq!(report.connectivity_status, ConnectivityStatus::Fragmented);
        assert_eq!(report.overall_status, OverallStatus::Critical);
        assert_eq!(report.isolated_buses, vec![BusId::new(5)]);
        assert_eq!(report.island_count(), 2);
        assert!(report.recommendations[0].starts_with("Reconnect isolated bus(es) 5"));

        // the bus was isolated before the change, so it does not block it
        let outcome = toggle_switch(&mut net, SwitchId::new(1), Some(false)).unwrap();
        match outcome {
            SwitchingOutcome::Committed {
                report, warnings, ..
            } => {
                assert_eq!(report.connectivity_status, ConnectivityStatus::Fragmented);
                assert_eq!(report.isolated_buses, vec![BusId::new(5)]);
                assert!(warnings.is_empty());
            }
            other => panic!("expected commit, got {:?}", other),
        }
        assert!(!net.switch(SwitchId::new(1)).unwrap().closed);

        // isolating a second bus is still refused
        let outcome = toggle_switch(&mut net, SwitchId::new(4), Some(false)).unwrap();
        assert_eq!(
            outcome,
            SwitchingOutcome::Rejected {
                newly_isolated: vec![BusId::new(4)]
            }
        );
    }

    #[test]
    fn open_ring_switch_is_redundant_path() {
        let mut net = ring_with_spur();
        net.set_switch_state(SwitchId::new(1), false).unwrap();
        let report = analyze(&net);
        assert!(report.is_connected());
        assert_eq!(report.switch_issues.len(), 1);
        assert_eq!(report.switch_issues[0].severity, SwitchSeverity::High);
        assert_eq!(report.switch_issues[0].impact, SwitchImpact::RedundantPath);
    }

    #[test]
    fn opening_spur_is_rejected_and_rolled_back() {
        let mut net = ring_with_spur();
        let outcome = toggle_switch(&mut net, SwitchId::new(4), None).unwrap();
        assert_eq!(
            outcome,
            SwitchingOutcome::Rejected {
                newly_isolated: vec![BusId::new(4)]
            }
        );
        assert!(net.switch(SwitchId::new(4)).unwrap().closed);

        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, GridError::TopologyRejected { buses } if buses == vec![4]));
    }

    #[test]
    fn forced_state_is_idempotent() {
        let mut net = ring_with_spur();
        let outcome = toggle_switch(&mut net, SwitchId::new(2), Some(true)).unwrap();
        assert!(outcome.is_committed());
        assert!(net.switch(SwitchId::new(2)).unwrap().closed);

        let outcome = toggle_switch(&mut net, SwitchId::new(2), Some(false)).unwrap();
        match outcome {
            SwitchingOutcome::Committed {
                previous, current, ..
            } => {
                assert!(previous);
                assert!(!current);
            }
            other => panic!("expected commit, got {:?}", other),
        }
    }

    #[test]
    fn bus_switch_is_medium_severity() {
        let mut net = ring_with_spur();
        net.add_bus(Bus::new(BusId::new(5), Kilovolts(230.0))).unwrap();
        net.add_branch(Branch::line(BranchId::new(5), BusId::new(5), BusId::new(1)))
            .unwrap();
        net.add_switch(
            Switch::new(SwitchId::new(9), BusId::new(5), SwitchElement::Bus(BusId::new(2))).open(),
        )
        .unwrap();
        let report = analyze(&net);
        let issue = &report.switch_issues[0];
        assert_eq!(issue.severity, SwitchSeverity::Medium);
        assert_eq!(issue.impact, SwitchImpact::RedundantPath);
        assert_eq!(issue.endpoints, (BusId::new(5), BusId::new(2)));
    }

    #[test]
    fn unknown_switch_is_an_error() {
        let mut net = ring_with_spur();
        assert!(matches!(
            toggle_switch(&mut net, SwitchId::new(77), None),
            Err(GridError::UnknownElement { kind: "switch", .. })
        ));
    }

    #[test]
    fn switch_listing_reports_energization() {
        let mut net = ring_with_spur();
        net.set_branch_in_service(BranchId::new(2), false).unwrap();
        let info = switch_info(&net);
        assert_eq!(info.len(), 4);
        assert_eq!(info[1].element_energized, Some(false));
        assert!(info[1].closed);
    }
}
