//! Shared fixtures: the IEEE 9-bus grid, a fixed "truth" state and solvers built on it.
#![allow(dead_code)]

use gridwatch_core::*;

pub const VOLTAGE_SIGMA: f64 = 0.004;
pub const FLOW_SIGMA: f64 = 1.0;

/// (from, to) for the nine lines, 0-indexed buses
pub const LINES: [(usize, usize); 9] = [
    (0, 3),
    (1, 6),
    (2, 8),
    (3, 4),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (3, 5),
];

const VM: [f64; 9] = [1.04, 1.025, 1.025, 1.026, 0.996, 1.013, 1.026, 1.016, 1.032];
const VA_DEG: [f64; 9] = [0.0, 9.3, 4.7, -2.2, -4.0, -3.7, 3.7, 0.7, 2.0];
/// (P, Q) at the from end of each line
const FLOWS: [(f64, f64); 9] = [
    (71.6, 27.0),
    (163.0, 6.7),
    (85.0, -10.9),
    (40.9, 22.9),
    (-84.1, -28.0),
    (-59.5, -13.5),
    (76.5, -0.8),
    (-24.0, -24.3),
    (30.7, 1.0),
];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// IEEE 9-bus grid at 138 kV, every line switched (closed) at its from bus.
pub fn ieee9_network() -> Network {
    let mut net = Network::new();
    for i in 0..9 {
        net.add_bus(Bus::new(BusId::new(i), Kilovolts(138.0)).with_name(format!("Bus {}", i + 1)))
            .unwrap();
    }
    for (i, (from, to)) in LINES.iter().enumerate() {
        net.add_branch(
            Branch::line(BranchId::new(i), BusId::new(*from), BusId::new(*to))
                .with_name(format!("Line {}-{}", from + 1, to + 1))
                .with_impedance(0.01, 0.085),
        )
        .unwrap();
        net.add_switch(Switch::new(
            SwitchId::new(i),
            BusId::new(*from),
            SwitchElement::Line(BranchId::new(i)),
        ))
        .unwrap();
    }
    net
}

/// A converged operating point for [`ieee9_network`].
pub fn truth_estimate() -> Estimate {
    let mut estimate = Estimate::new();
    for i in 0..9 {
        estimate.set_bus(
            BusId::new(i),
            BusState::new(PerUnit(VM[i]), Radians(VA_DEG[i].to_radians())),
        );
    }
    for (i, (p, q)) in FLOWS.iter().enumerate() {
        estimate.set_branch(
            BranchId::new(i),
            BranchFlow {
                p_from: Megawatts(*p),
                q_from: Megavars(*q),
                p_to: Megawatts(-0.98 * p),
                q_to: Megavars(-0.95 * q),
            },
        );
    }
    estimate
}

/// Noise-free voltage at every bus and P/Q at both ends of every line.
///
/// Ids: voltages 0..=8, then line `i` holds P from, P to, Q from, Q to at `9 + 4i ..`.
pub fn full_measurements() -> MeasurementSet {
    let truth = truth_estimate();
    let mut set = MeasurementSet::new();
    for i in 0..9 {
        let target = MeasurementTarget::Voltage { bus: BusId::new(i) };
        set.add(target, truth.value_for(&target).unwrap(), VOLTAGE_SIGMA);
    }
    for i in 0..LINES.len() {
        let branch = BranchId::new(i);
        for target in [
            MeasurementTarget::ActivePower { branch, side: Side::From },
            MeasurementTarget::ActivePower { branch, side: Side::To },
            MeasurementTarget::ReactivePower { branch, side: Side::From },
            MeasurementTarget::ReactivePower { branch, side: Side::To },
        ] {
            set.add(target, truth.value_for(&target).unwrap(), FLOW_SIGMA);
        }
    }
    set
}

pub fn ieee9_context() -> GridContext {
    GridContext::new(ieee9_network(), full_measurements())
}

pub fn find_id(set: &MeasurementSet, target: MeasurementTarget) -> MeasurementId {
    set.iter()
        .find(|m| m.target == target)
        .map(|m| m.id)
        .unwrap()
}

/// Shift a measurement by `k` of its own standard deviations.
pub fn displace(set: &mut MeasurementSet, id: MeasurementId, k: f64) {
    let m = set.get(id).unwrap().clone();
    set.set_value(id, m.value + k * m.sigma).unwrap();
}

/// Always returns the truth state, whatever the measurements say.
pub fn truth_solver() -> impl Fn(&Network, &MeasurementSet) -> Result<Estimate, NonConvergence> {
    let truth = truth_estimate();
    move |_: &Network, _: &MeasurementSet| Ok(truth.clone())
}

pub fn failing_solver() -> impl Fn(&Network, &MeasurementSet) -> Result<Estimate, NonConvergence>
{
    |_: &Network, _: &MeasurementSet| Err(NonConvergence::new("maximum iterations exceeded"))
}
