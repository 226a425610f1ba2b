use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::algo::{connected_components, has_path_connecting};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::Serialize;

use crate::{BranchId, BusId, Network, SwitchElement, SwitchId};

/// Why two buses are adjacent in the live graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Link {
    Branch(BranchId),
    BusSwitch(SwitchId),
}

/// A connected component of the live graph, members sorted by bus id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Island {
    pub island_id: usize,
    pub buses: Vec<BusId>,
}

impl Island {
    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

/// Degree distribution and component count of the live graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegreeStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub connected_components: usize,
    pub min_degree: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
}

/// Switch-aware adjacency over buses. Derived from a [`Network`] and never updated in
/// place; rebuild it after any switch or in-service change.
#[derive(Debug, Clone)]
pub struct ConnectivityGraph {
    graph: UnGraph<BusId, Link>,
    nodes: HashMap<BusId, NodeIndex>,
}

/// Build the live graph: one node per bus, one edge per energized branch and per
/// closed bus-to-bus switch.
pub fn build_connectivity(network: &Network) -> ConnectivityGraph {
    let mut graph = UnGraph::with_capacity(network.bus_count(), network.branch_count());
    let mut nodes = HashMap::with_capacity(network.bus_count());
    for bus in network.buses() {
        nodes.insert(bus.id, graph.add_node(bus.id));
    }

    for branch in network.branches() {
        if !network.is_energized(branch.id) {
            continue;
        }
        if let (Some(&a), Some(&b)) = (nodes.get(&branch.from_bus), nodes.get(&branch.to_bus)) {
            graph.add_edge(a, b, Link::Branch(branch.id));
        }
    }

    for switch in network.switches() {
        if let SwitchElement::Bus(other) = switch.element {
            if !switch.closed {
                continue;
            }
            if let (Some(&a), Some(&b)) = (nodes.get(&switch.bus), nodes.get(&other)) {
                graph.add_edge(a, b, Link::BusSwitch(switch.id));
            }
        }
    }

    ConnectivityGraph { graph, nodes }
}

impl ConnectivityGraph {
    pub fn bus_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_bus(&self, bus: BusId) -> bool {
        self.nodes.contains_key(&bus)
    }

    /// Buses in network insertion order
    pub fn buses(&self) -> impl Iterator<Item = BusId> + '_ {
        self.graph.node_weights().copied()
    }

    /// Distinct neighbouring buses, excluding the bus itself.
    pub fn neighbors(&self, bus: BusId) -> BTreeSet<BusId> {
        let Some(&idx) = self.nodes.get(&bus) else {
            return BTreeSet::new();
        };
        self.graph
            .neighbors(idx)
            .map(|n| self.graph[n])
            .filter(|n| *n != bus)
            .collect()
    }

    pub fn degree(&self, bus: BusId) -> usize {
        self.neighbors(bus).len()
    }

    pub fn has_edge(&self, a: BusId, b: BusId) -> bool {
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(&x), Some(&y)) => self.graph.contains_edge(x, y),
            _ => false,
        }
    }

    /// Links between `a` and `b`, counting parallel branches separately.
    pub fn links_between(&self, a: BusId, b: BusId) -> Vec<Link> {
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(&x), Some(&y)) => self
                .graph
                .edges_connecting(x, y)
                .map(|e| *e.weight())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Every live link with an endpoint at `bus`.
    pub fn links_at(&self, bus: BusId) -> Vec<Link> {
        match self.nodes.get(&bus) {
            Some(&idx) => self.graph.edges(idx).map(|e| *e.weight()).collect(),
            None => Vec::new(),
        }
    }

    pub fn connected(&self, a: BusId, b: BusId) -> bool {
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(&x), Some(&y)) => has_path_connecting(&self.graph, x, y, None),
            _ => false,
        }
    }

    /// Connected components by breadth-first search, started from each unvisited
    /// bus in insertion order.
    pub fn islands(&self) -> Vec<Island> {
        let mut visited = HashSet::new();
        let mut islands = Vec::new();
        for start in self.graph.node_indices() {
            if visited.contains(&start) {
                continue;
            }
            let mut queue = VecDeque::new();
            queue.push_back(start);
            let mut members = Vec::new();
            while let Some(node) = queue.pop_front() {
                if !visited.insert(node) {
                    continue;
                }
                members.push(self.graph[node]);
                for neighbor in self.graph.neighbors(node) {
                    if !visited.contains(&neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
            members.sort();
            islands.push(Island {
                island_id: islands.len(),
                buses: members,
            });
        }
        islands
    }

    /// Map each bus to the id of the island containing it.
    pub fn island_map(&self) -> HashMap<BusId, usize> {
        self.islands()
            .into_iter()
            .flat_map(|island| {
                let id = island.island_id;
                island.buses.into_iter().map(move |bus| (bus, id))
            })
            .collect()
    }

    pub fn isolated_buses(&self) -> Vec<BusId> {
        let mut isolated: Vec<BusId> = self.buses().filter(|b| self.degree(*b) == 0).collect();
        isolated.sort();
        isolated
    }

    /// Buses with exactly one neighbour, paired with that neighbour.
    pub fn radial_buses(&self) -> Vec<(BusId, BusId)> {
        let mut radial: Vec<(BusId, BusId)> = self
            .buses()
            .filter_map(|bus| {
                let neighbors = self.neighbors(bus);
                match (neighbors.len(), neighbors.first()) {
                    (1, Some(&only)) => Some((bus, only)),
                    _ => None,
                }
            })
            .collect();
        radial.sort();
        radial
    }

    pub fn degree_stats(&self) -> DegreeStats {
        let node_count = self.graph.node_count();
        let degrees: Vec<usize> = self.buses().map(|b| self.degree(b)).collect();
        let min_degree = degrees.iter().copied().min().unwrap_or(0);
        let max_degree = degrees.iter().copied().max().unwrap_or(0);
        let avg_degree = if node_count == 0 {
            0.0
        } else {
            degrees.iter().sum::<usize>() as f64 / node_count as f64
        };
        DegreeStats {
            node_count,
            edge_count: self.graph.edge_count(),
            connected_components: connected_components(&self.graph),
            min_degree,
            avg_degree,
            max_degree,
        }
    }
}
