//! Property-based tests for the switch-aware connectivity graph.

use gridwatch_core::*;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

/// A chain 0-1-..-(n-1) plus `extra` random chords, every branch switched at its
/// from-bus. Switches are all closed.
fn arb_switched_chain(max_buses: usize) -> impl Strategy<Value = Network> {
    (2..=max_buses).prop_flat_map(|n| {
        proptest::collection::vec((0..n, 0..n), 0..n).prop_map(move |chords| {
            let mut net = Network::new();
            for i in 0..n {
                net.add_bus(Bus::new(BusId::new(i), Kilovolts(138.0))).unwrap();
            }
            let mut next_branch = 0;
            let mut link = |net: &mut Network, a: usize, b: usize| {
                let id = BranchId::new(next_branch);
                next_branch += 1;
                net.add_branch(Branch::line(id, BusId::new(a), BusId::new(b)))
                    .unwrap();
                net.add_switch(Switch::new(
                    SwitchId::new(id.value()),
                    BusId::new(a),
                    SwitchElement::Line(id),
                ))
                .unwrap();
            };
            for i in 0..n - 1 {
                link(&mut net, i, i + 1);
            }
            for (a, b) in chords {
                link(&mut net, a, b);
            }
            net
        })
    })
}

fn edge_signature(net: &Network) -> Vec<(BusId, BusId, usize)> {
    let graph = build_connectivity(net);
    let mut sig = Vec::new();
    for a in graph.buses() {
        for b in graph.buses() {
            if a <= b {
                let links = graph.links_between(a, b).len();
                if links > 0 {
                    sig.push((a, b, links));
                }
            }
        }
    }
    sig
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A chained grid with every switch closed is a single island holding every bus.
    #[test]
    fn chained_grid_is_one_island(net in arb_switched_chain(24)) {
        let graph = build_connectivity(&net);
        let islands = graph.islands();
        prop_assert_eq!(islands.len(), 1);
        prop_assert_eq!(islands[0].len(), net.bus_count());
        prop_assert!(graph.isolated_buses().is_empty());
    }

    /// Opening a branch's switch drops exactly that branch; closing it restores the graph.
    #[test]
    fn switch_round_trip_restores_edges(
        net in arb_switched_chain(16),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut net = net;
        let before = edge_signature(&net);
        let edges_before = build_connectivity(&net).edge_count();

        let switch = net.switches()[pick.index(net.switches().len())].clone();
        let branch = switch.element.branch().unwrap();

        net.set_switch_state(switch.id, false).unwrap();
        let graph = build_connectivity(&net);
        prop_assert_eq!(graph.edge_count(), edges_before - 1);
        prop_assert!(!net.is_energized(branch));

        net.set_switch_state(switch.id, true).unwrap();
        prop_assert_eq!(edge_signature(&net), before);
    }

    /// Adjacency is symmetric.
    #[test]
    fn adjacency_is_symmetric(net in arb_switched_chain(16)) {
        let graph = build_connectivity(&net);
        for a in graph.buses() {
            for b in graph.neighbors(a) {
                prop_assert!(graph.neighbors(b).contains(&a));
            }
        }
    }
}
