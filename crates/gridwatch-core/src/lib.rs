//! # gridwatch-core: grid model and measurement primitives
//!
//! Data structures shared by the observability and bad-data engines:
//!
//! - [`Network`]: buses and branches as an undirected petgraph multigraph, plus the
//!   switch list that decides which branches are live.
//! - [`MeasurementSet`]: a slot-map arena of sensor readings addressed by stable
//!   [`MeasurementId`]s, with snapshot/restore for rollback.
//! - [`StateSolver`] / [`Estimate`]: the seam to the external state-estimation solver.
//! - [`GridContext`]: the network and its measurements, passed explicitly to every
//!   analysis instead of living in a global.
//! - [`graph_utils`]: the switch-aware connectivity graph and island primitives.
//!
//! ## Quick Start
//!
//! ```
//! use gridwatch_core::*;
//!
//! let mut network = Network::new();
//! network.add_bus(Bus::new(BusId::new(1), Kilovolts(138.0))).unwrap();
//! network.add_bus(Bus::new(BusId::new(2), Kilovolts(138.0))).unwrap();
//! network
//!     .add_branch(Branch::line(BranchId::new(1), BusId::new(1), BusId::new(2)))
//!     .unwrap();
//! network
//!     .add_switch(Switch::new(
//!         SwitchId::new(1),
//!         BusId::new(1),
//!         SwitchElement::Line(BranchId::new(1)),
//!     ))
//!     .unwrap();
//!
//! assert!(network.is_energized(BranchId::new(1)));
//! network.set_switch_state(SwitchId::new(1), false).unwrap();
//! assert!(!network.is_energized(BranchId::new(1)));
//! ```

use std::collections::HashMap;

use petgraph::graph::{EdgeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod context;
pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod measurement;
pub mod solver;
pub mod units;

pub use context::GridContext;
pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{GridError, GridResult};
pub use graph_utils::{build_connectivity, ConnectivityGraph, DegreeStats, Island, Link};
pub use measurement::{
    ElementRef, KindCounts, Measurement, MeasurementKind, MeasurementSet, MeasurementSnapshot,
    MeasurementTarget, Provenance, Side,
};
pub use petgraph::graph::NodeIndex;
pub use solver::{BranchFlow, BusState, Estimate, NonConvergence, StateSolver};
pub use units::{Kilovolts, Megavars, Megawatts, PerUnit, Radians};

macro_rules! element_id {
    ($name:ident, $label:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub fn new(value: usize) -> Self {
                $name(value)
            }
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, " {}"), self.0)
            }
        }
    };
}

element_id!(BusId, "Bus");
element_id!(BranchId, "Branch");
element_id!(SwitchId, "Switch");
element_id!(MeasurementId, "Measurement");

/// An electrical node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    pub id: BusId,
    pub name: Option<String>,
    /// Nominal voltage level
    pub base_kv: Kilovolts,
}

impl Bus {
    pub fn new(id: BusId, base_kv: Kilovolts) -> Self {
        Self {
            id,
            name: None,
            base_kv,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name if set, otherwise "Bus <id>"
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    Line,
    Transformer,
}

impl BranchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchKind::Line => "line",
            BranchKind::Transformer => "transformer",
        }
    }
}

/// A line or transformer between two buses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub name: Option<String>,
    pub from_bus: BusId,
    pub to_bus: BusId,
    pub kind: BranchKind,
    /// Series resistance (per-unit)
    pub resistance: f64,
    /// Series reactance (per-unit)
    pub reactance: f64,
    pub in_service: bool,
}

impl Branch {
    pub fn line(id: BranchId, from_bus: BusId, to_bus: BusId) -> Self {
        Self {
            id,
            name: None,
            from_bus,
            to_bus,
            kind: BranchKind::Line,
            resistance: 0.0,
            reactance: 0.0,
            in_service: true,
        }
    }

    pub fn transformer(id: BranchId, from_bus: BusId, to_bus: BusId) -> Self {
        Self {
            kind: BranchKind::Transformer,
            ..Self::line(id, from_bus, to_bus)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_impedance(mut self, resistance: f64, reactance: f64) -> Self {
        self.resistance = resistance;
        self.reactance = reactance;
        self
    }

    /// The endpoint opposite `bus`, if `bus` is an endpoint at all.
    pub fn other_end(&self, bus: BusId) -> Option<BusId> {
        if bus == self.from_bus {
            Some(self.to_bus)
        } else if bus == self.to_bus {
            Some(self.from_bus)
        } else {
            None
        }
    }
}

/// The element a switch opens or closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "element_type", content = "element_id", rename_all = "lowercase")]
pub enum SwitchElement {
    Line(BranchId),
    Transformer(BranchId),
    /// Bus coupler/sectionalizer between the anchor bus and this bus
    Bus(BusId),
}

impl SwitchElement {
    pub fn branch(&self) -> Option<BranchId> {
        match self {
            SwitchElement::Line(id) | SwitchElement::Transformer(id) => Some(*id),
            SwitchElement::Bus(_) => None,
        }
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            SwitchElement::Line(_) => "line",
            SwitchElement::Transformer(_) => "transformer",
            SwitchElement::Bus(_) => "bus",
        }
    }
}

/// A breaker or disconnector anchored at a bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    pub id: SwitchId,
    pub name: Option<String>,
    /// Bus the switch is installed at
    pub bus: BusId,
    pub element: SwitchElement,
    pub closed: bool,
}

impl Switch {
    /// A closed switch.
    pub fn new(id: SwitchId, bus: BusId, element: SwitchElement) -> Self {
        Self {
            id,
            name: None,
            bus,
            element,
            closed: true,
        }
    }

    pub fn open(mut self) -> Self {
        self.closed = false;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// The grid model: buses and branches as an undirected multigraph plus switches.
///
/// Parallel branches between the same pair of buses are separate edges. All
/// element references are checked on insertion, so a `Network` built through
/// `add_*` never holds a dangling bus id.
#[derive(Debug, Clone, Default)]
pub struct Network {
    graph: UnGraph<Bus, Branch>,
    bus_index: HashMap<BusId, NodeIndex>,
    branch_index: HashMap<BranchId, EdgeIndex>,
    switches: Vec<Switch>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bus(&mut self, bus: Bus) -> GridResult<NodeIndex> {
        if self.bus_index.contains_key(&bus.id) {
            return Err(GridError::DuplicateId {
                kind: "bus",
                id: bus.id.value(),
            });
        }
        let id = bus.id;
        let idx = self.graph.add_node(bus);
        self.bus_index.insert(id, idx);
        Ok(idx)
    }

    pub fn add_branch(&mut self, branch: Branch) -> GridResult<EdgeIndex> {
        if self.branch_index.contains_key(&branch.id) {
            return Err(GridError::DuplicateId {
                kind: "branch",
                id: branch.id.value(),
            });
        }
        let from = self.node_of(branch.from_bus, &branch.id.to_string())?;
        let to = self.node_of(branch.to_bus, &branch.id.to_string())?;
        let id = branch.id;
        let idx = self.graph.add_edge(from, to, branch);
        self.branch_index.insert(id, idx);
        Ok(idx)
    }

    pub fn add_switch(&mut self, switch: Switch) -> GridResult<()> {
        if self.switch(switch.id).is_some() {
            return Err(GridError::DuplicateId {
                kind: "switch",
                id: switch.id.value(),
            });
        }
        let label = switch.id.to_string();
        self.node_of(switch.bus, &label)?;
        match switch.element {
            SwitchElement::Line(branch) | SwitchElement::Transformer(branch) => {
                if !self.branch_index.contains_key(&branch) {
                    return Err(GridError::UnknownElement {
                        kind: "branch",
                        id: branch.value(),
                    });
                }
            }
            SwitchElement::Bus(bus) => {
                self.node_of(bus, &label)?;
            }
        }
        self.switches.push(switch);
        Ok(())
    }

    fn node_of(&self, bus: BusId, element: &str) -> GridResult<NodeIndex> {
        self.bus_index
            .get(&bus)
            .copied()
            .ok_or_else(|| GridError::InvalidReference {
                element: element.to_string(),
                bus: bus.value(),
            })
    }

    pub fn bus_node(&self, bus: BusId) -> Option<NodeIndex> {
        self.bus_index.get(&bus).copied()
    }

    pub fn contains_bus(&self, bus: BusId) -> bool {
        self.bus_index.contains_key(&bus)
    }

    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.bus_index.get(&id).map(|idx| &self.graph[*idx])
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branch_index.get(&id).map(|idx| &self.graph[*idx])
    }

    pub fn switch(&self, id: SwitchId) -> Option<&Switch> {
        self.switches.iter().find(|s| s.id == id)
    }

    /// Buses in insertion order
    pub fn buses(&self) -> impl Iterator<Item = &Bus> {
        self.graph.node_weights()
    }

    /// Branches in insertion order
    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.graph.edge_weights()
    }

    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    pub fn bus_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn branch_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Branches with an endpoint at `bus`, regardless of energization.
    pub fn branches_at(&self, bus: BusId) -> Vec<&Branch> {
        match self.bus_index.get(&bus) {
            Some(idx) => self.graph.edges(*idx).map(|e| e.weight()).collect(),
            None => Vec::new(),
        }
    }

    pub fn switches_controlling(&self, branch: BranchId) -> impl Iterator<Item = &Switch> {
        self.switches
            .iter()
            .filter(move |s| s.element.branch() == Some(branch))
    }

    /// A branch is live iff it is in service and every switch controlling it is closed.
    pub fn is_energized(&self, branch: BranchId) -> bool {
        match self.branch(branch) {
            Some(b) if b.in_service => self.switches_controlling(branch).all(|s| s.closed),
            _ => false,
        }
    }

    /// Set a switch's state, returning the previous one.
    pub fn set_switch_state(&mut self, id: SwitchId, closed: bool) -> GridResult<bool> {
        let switch = self
            .switches
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(GridError::UnknownElement {
                kind: "switch",
                id: id.value(),
            })?;
        debug!(switch = %id, closed, "switch state set");
        Ok(std::mem::replace(&mut switch.closed, closed))
    }

    /// Set a branch's in-service flag, returning the previous one.
    pub fn set_branch_in_service(&mut self, id: BranchId, in_service: bool) -> GridResult<bool> {
        let idx = *self
            .branch_index
            .get(&id)
            .ok_or(GridError::UnknownElement {
                kind: "branch",
                id: id.value(),
            })?;
        debug!(branch = %id, in_service, "branch service state set");
        let branch = &mut self.graph[idx];
        Ok(std::mem::replace(&mut branch.in_service, in_service))
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            num_buses: self.bus_count(),
            num_branches: self.branch_count(),
            num_switches: self.switches.len(),
            num_open_switches: self.switches.iter().filter(|s| !s.closed).count(),
            num_out_of_service: self.branches().filter(|b| !b.in_service).count(),
            num_energized: self.branches().filter(|b| self.is_energized(b.id)).count(),
        }
    }

    /// Validate the model for issues that make observability results misleading.
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        let stats = self.stats();
        if stats.num_buses == 0 {
            diag.add_error("structure", "Network has no buses");
            return;
        }
        if stats.num_branches == 0 && stats.num_buses > 1 {
            diag.add_error("structure", "Network has multiple buses but no branches");
        }

        for branch in self.branches() {
            if branch.from_bus == branch.to_bus {
                diag.add_warning_with_entity(
                    "structure",
                    "Branch connects a bus to itself",
                    &branch.id.to_string(),
                );
            }
            if !branch.in_service {
                diag.add_warning_with_entity(
                    "structure",
                    "Branch is out of service",
                    &branch.id.to_string(),
                );
            }
        }

        for switch in &self.switches {
            let entity = switch.label();
            if !self.contains_bus(switch.bus) {
                diag.add_error_with_entity("reference", "Switch anchor bus missing", &entity);
                continue;
            }
            match switch.element {
                SwitchElement::Line(id) | SwitchElement::Transformer(id) => {
                    let Some(branch) = self.branch(id) else {
                        diag.add_error_with_entity(
                            "reference",
                            "Switch controls a missing branch",
                            &entity,
                        );
                        continue;
                    };
                    if branch.kind.as_str() != switch.element.type_str() {
                        diag.add_warning_with_entity(
                            "switch",
                            &format!(
                                "Switch declared as {} but controls a {}",
                                switch.element.type_str(),
                                branch.kind.as_str()
                            ),
                            &entity,
                        );
                    }
                    if branch.other_end(switch.bus).is_none() {
                        diag.add_warning_with_entity(
                            "switch",
                            "Switch anchor bus is not an endpoint of its branch",
                            &entity,
                        );
                    }
                }
                SwitchElement::Bus(other) => {
                    if !self.contains_bus(other) {
                        diag.add_error_with_entity(
                            "reference",
                            "Bus switch targets a missing bus",
                            &entity,
                        );
                    } else if other == switch.bus {
                        diag.add_warning_with_entity(
                            "switch",
                            "Bus switch connects a bus to itself",
                            &entity,
                        );
                    }
                }
            }
        }
    }
}

/// Size and switching summary of a network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub num_buses: usize,
    pub num_branches: usize,
    pub num_switches: usize,
    pub num_open_switches: usize,
    pub num_out_of_service: usize,
    pub num_energized: usize,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} buses, {} branches ({} energized), {} switches ({} open)",
            self.num_buses,
            self.num_branches,
            self.num_energized,
            self.num_switches,
            self.num_open_switches
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bus_network() -> Network {
        let mut network = Network::new();
        network
            .add_bus(Bus::new(BusId::new(1), Kilovolts(138.0)).with_name("North"))
            .unwrap();
        network
            .add_bus(Bus::new(BusId::new(2), Kilovolts(138.0)))
            .unwrap();
        network
            .add_branch(
                Branch::line(BranchId::new(10), BusId::new(1), BusId::new(2))
                    .with_impedance(0.01, 0.1),
            )
            .unwrap();
        network
    }

    #[test]
    fn test_network_creation() {
        let network = two_bus_network();
        assert_eq!(network.bus_count(), 2);
        assert_eq!(network.branch_count(), 1);
        assert_eq!(network.bus(BusId::new(1)).unwrap().label(), "North");
        assert_eq!(network.bus(BusId::new(2)).unwrap().label(), "Bus 2");
    }

    #[test]
    fn test_duplicate_bus_rejected() {
        let mut network = two_bus_network();
        let err = network
            .add_bus(Bus::new(BusId::new(1), Kilovolts(138.0)))
            .unwrap_err();
        assert!(matches!(err, GridError::DuplicateId { kind: "bus", id: 1 }));
    }

    #[test]
    fn test_branch_with_missing_endpoint_rejected() {
        let mut network = two_bus_network();
        let err = network
            .add_branch(Branch::line(BranchId::new(11), BusId::new(2), BusId::new(9)))
            .unwrap_err();
        assert!(matches!(err, GridError::InvalidReference { bus: 9, .. }));
        assert_eq!(network.branch_count(), 1);
    }

    #[test]
    fn test_switch_references_checked() {
        let mut network = two_bus_network();
        let err = network
            .add_switch(Switch::new(
                SwitchId::new(1),
                BusId::new(1),
                SwitchElement::Line(BranchId::new(99)),
            ))
            .unwrap_err();
        assert!(matches!(err, GridError::UnknownElement { kind: "branch", .. }));

        let err = network
            .add_switch(Switch::new(
                SwitchId::new(2),
                BusId::new(5),
                SwitchElement::Bus(BusId::new(1)),
            ))
            .unwrap_err();
        assert!(matches!(err, GridError::InvalidReference { bus: 5, .. }));
    }

    #[test]
    fn test_energization_requires_all_switches_closed() {
        let mut network = two_bus_network();
        let branch = BranchId::new(10);
        assert!(network.is_energized(branch), "no switch means always live");

        network
            .add_switch(Switch::new(SwitchId::new(1), BusId::new(1), SwitchElement::Line(branch)))
            .unwrap();
        network
            .add_switch(Switch::new(SwitchId::new(2), BusId::new(2), SwitchElement::Line(branch)))
            .unwrap();
        assert!(network.is_energized(branch));

        assert!(network.set_switch_state(SwitchId::new(2), false).unwrap());
        assert!(!network.is_energized(branch));

        network.set_switch_state(SwitchId::new(2), true).unwrap();
        network.set_branch_in_service(branch, false).unwrap();
        assert!(!network.is_energized(branch));
    }

    #[test]
    fn test_network_stats() {
        let mut network = two_bus_network();
        network
            .add_switch(
                Switch::new(
                    SwitchId::new(1),
                    BusId::new(1),
                    SwitchElement::Line(BranchId::new(10)),
                )
                .open(),
            )
            .unwrap();
        let stats = network.stats();
        assert_eq!(stats.num_open_switches, 1);
        assert_eq!(stats.num_energized, 0);
        assert_eq!(
            stats.to_string(),
            "2 buses, 1 branches (0 energized), 1 switches (1 open)"
        );
    }

    #[test]
    fn test_network_validation_empty() {
        let network = Network::new();
        let mut diag = Diagnostics::new();
        network.validate_into(&mut diag);
        assert!(diag.has_errors());
        assert!(diag.errors().any(|i| i.message.contains("no buses")));
    }

    #[test]
    fn test_validation_flags_switch_type_mismatch() {
        let mut network = two_bus_network();
        network
            .add_switch(Switch::new(
                SwitchId::new(3),
                BusId::new(1),
                SwitchElement::Transformer(BranchId::new(10)),
            ))
            .unwrap();
        let mut diag = Diagnostics::new();
        network.validate_into(&mut diag);
        assert!(!diag.has_errors());
        assert!(diag
            .warnings()
            .any(|i| i.message.contains("declared as transformer but controls a line")));
    }

    #[test]
    fn test_other_end() {
        let branch = Branch::transformer(BranchId::new(1), BusId::new(3), BusId::new(4));
        assert_eq!(branch.other_end(BusId::new(3)), Some(BusId::new(4)));
        assert_eq!(branch.other_end(BusId::new(4)), Some(BusId::new(3)));
        assert_eq!(branch.other_end(BusId::new(5)), None);
    }
}
