//! Measurement model and the stable-id measurement arena.
//!
//! A [`MeasurementSet`] stores readings in a [`SlotMap`] and keeps a side table from
//! the public [`MeasurementId`] to the arena key. Ids are never reused within a set,
//! so a measurement removed by the bad-data loop can be reported and later restored
//! under the same id without shifting anything else.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use tracing::debug;

use crate::error::{GridError, GridResult};
use crate::{BranchId, BusId, MeasurementId};

new_key_type! {
    struct MeasurementKey;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasurementKind {
    /// Bus voltage magnitude (per-unit)
    Voltage,
    /// Branch active power flow (MW)
    ActivePower,
    /// Branch reactive power flow (Mvar)
    ReactivePower,
}

impl MeasurementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKind::Voltage => "voltage",
            MeasurementKind::ActivePower => "active-power",
            MeasurementKind::ReactivePower => "reactive-power",
        }
    }

    pub fn is_flow(&self) -> bool {
        !matches!(self, MeasurementKind::Voltage)
    }
}

impl std::fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Branch end a flow measurement is taken at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    From,
    To,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::From => "from",
            Side::To => "to",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    #[default]
    Real,
    /// Pseudomeasurement or otherwise simulated reading
    Synthetic,
}

/// The grid element a measurement is attached to, without the side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "element_type", content = "element_id", rename_all = "lowercase")]
pub enum ElementRef {
    Bus(BusId),
    Branch(BranchId),
}

impl std::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementRef::Bus(id) => write!(f, "{}", id),
            ElementRef::Branch(id) => write!(f, "{}", id),
        }
    }
}

/// What a measurement observes. Each kind carries exactly the addressing it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MeasurementTarget {
    Voltage { bus: BusId },
    ActivePower { branch: BranchId, side: Side },
    ReactivePower { branch: BranchId, side: Side },
}

impl MeasurementTarget {
    pub fn kind(&self) -> MeasurementKind {
        match self {
            MeasurementTarget::Voltage { .. } => MeasurementKind::Voltage,
            MeasurementTarget::ActivePower { .. } => MeasurementKind::ActivePower,
            MeasurementTarget::ReactivePower { .. } => MeasurementKind::ReactivePower,
        }
    }

    pub fn element(&self) -> ElementRef {
        match *self {
            MeasurementTarget::Voltage { bus } => ElementRef::Bus(bus),
            MeasurementTarget::ActivePower { branch, .. }
            | MeasurementTarget::ReactivePower { branch, .. } => ElementRef::Branch(branch),
        }
    }

    pub fn side(&self) -> Option<Side> {
        match *self {
            MeasurementTarget::Voltage { .. } => None,
            MeasurementTarget::ActivePower { side, .. }
            | MeasurementTarget::ReactivePower { side, .. } => Some(side),
        }
    }

    pub fn branch(&self) -> Option<BranchId> {
        match self.element() {
            ElementRef::Branch(id) => Some(id),
            ElementRef::Bus(_) => None,
        }
    }

    /// Build a flow target; `None` when `kind` is not a flow kind.
    pub fn flow(kind: MeasurementKind, branch: BranchId, side: Side) -> Option<Self> {
        match kind {
            MeasurementKind::Voltage => None,
            MeasurementKind::ActivePower => Some(MeasurementTarget::ActivePower { branch, side }),
            MeasurementKind::ReactivePower => {
                Some(MeasurementTarget::ReactivePower { branch, side })
            }
        }
    }
}

impl std::fmt::Display for MeasurementTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasurementTarget::Voltage { bus } => write!(f, "voltage @ {}", bus),
            MeasurementTarget::ActivePower { branch, side } => {
                write!(f, "active-power @ {} ({})", branch, side.as_str())
            }
            MeasurementTarget::ReactivePower { branch, side } => {
                write!(f, "reactive-power @ {} ({})", branch, side.as_str())
            }
        }
    }
}

/// A sensor reading with its uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: MeasurementId,
    pub target: MeasurementTarget,
    pub value: f64,
    /// Standard deviation in the measurement's own unit
    pub sigma: f64,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Measurement {
    pub fn new(id: MeasurementId, target: MeasurementTarget, value: f64, sigma: f64) -> Self {
        Self {
            id,
            target,
            value,
            sigma,
            provenance: Provenance::Real,
        }
    }

    pub fn synthetic(mut self) -> Self {
        self.provenance = Provenance::Synthetic;
        self
    }

    pub fn kind(&self) -> MeasurementKind {
        self.target.kind()
    }
}

/// Per-kind measurement counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub voltage: usize,
    pub active_power: usize,
    pub reactive_power: usize,
}

impl KindCounts {
    pub fn total(&self) -> usize {
        self.voltage + self.active_power + self.reactive_power
    }

    pub fn get(&self, kind: MeasurementKind) -> usize {
        match kind {
            MeasurementKind::Voltage => self.voltage,
            MeasurementKind::ActivePower => self.active_power,
            MeasurementKind::ReactivePower => self.reactive_power,
        }
    }
}

/// Owned copy of a measurement set, used to roll back removals and edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSnapshot {
    measurements: Vec<Measurement>,
    next_id: usize,
}

impl MeasurementSnapshot {
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }
}

/// Arena of measurements addressed by stable [`MeasurementId`].
#[derive(Debug, Clone, Default)]
pub struct MeasurementSet {
    arena: SlotMap<MeasurementKey, Measurement>,
    index: HashMap<MeasurementId, MeasurementKey>,
    next_id: usize,
}

impl MeasurementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a real measurement under the next free id.
    pub fn add(&mut self, target: MeasurementTarget, value: f64, sigma: f64) -> MeasurementId {
        self.add_with_provenance(target, value, sigma, Provenance::Real)
    }

    pub fn add_with_provenance(
        &mut self,
        target: MeasurementTarget,
        value: f64,
        sigma: f64,
        provenance: Provenance,
    ) -> MeasurementId {
        let id = MeasurementId::new(self.next_id);
        let measurement = Measurement {
            id,
            target,
            value,
            sigma,
            provenance,
        };
        self.store(measurement);
        id
    }

    /// Insert a measurement that already carries its id.
    pub fn insert(&mut self, measurement: Measurement) -> GridResult<()> {
        if self.index.contains_key(&measurement.id) {
            return Err(GridError::DuplicateId {
                kind: "measurement",
                id: measurement.id.value(),
            });
        }
        self.store(measurement);
        Ok(())
    }

    fn store(&mut self, measurement: Measurement) {
        let id = measurement.id;
        self.next_id = self.next_id.max(id.value() + 1);
        let key = self.arena.insert(measurement);
        self.index.insert(id, key);
    }

    pub fn get(&self, id: MeasurementId) -> Option<&Measurement> {
        self.index.get(&id).and_then(|key| self.arena.get(*key))
    }

    pub fn contains(&self, id: MeasurementId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Measurements ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        let mut all: Vec<&Measurement> = self.arena.values().collect();
        all.sort_by_key(|m| m.id);
        all.into_iter()
    }

    pub fn ids(&self) -> Vec<MeasurementId> {
        let mut ids: Vec<MeasurementId> = self.index.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn of_kind(&self, kind: MeasurementKind) -> impl Iterator<Item = &Measurement> {
        self.iter().filter(move |m| m.kind() == kind)
    }

    pub fn remove(&mut self, id: MeasurementId) -> GridResult<Measurement> {
        let key = self.index.remove(&id).ok_or(GridError::UnknownElement {
            kind: "measurement",
            id: id.value(),
        })?;
        self.arena.remove(key).ok_or(GridError::UnknownElement {
            kind: "measurement",
            id: id.value(),
        })
    }

    /// Remove several measurements. Fails without removing anything if any id is unknown.
    pub fn remove_many(&mut self, ids: &[MeasurementId]) -> GridResult<Vec<Measurement>> {
        if let Some(missing) = ids.iter().find(|id| !self.contains(**id)) {
            return Err(GridError::UnknownElement {
                kind: "measurement",
                id: missing.value(),
            });
        }
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            // a repeated id was already taken out on its first occurrence
            if let Some(key) = self.index.remove(id) {
                if let Some(m) = self.arena.remove(key) {
                    removed.push(m);
                }
            }
        }
        Ok(removed)
    }

    /// Remove every measurement of `kind`, returning how many were dropped.
    pub fn remove_kind(&mut self, kind: MeasurementKind) -> usize {
        let doomed: Vec<MeasurementId> = self.of_kind(kind).map(|m| m.id).collect();
        for id in &doomed {
            if let Some(key) = self.index.remove(id) {
                self.arena.remove(key);
            }
        }
        doomed.len()
    }

    /// Overwrite a measurement's value, returning the old one.
    pub fn set_value(&mut self, id: MeasurementId, value: f64) -> GridResult<f64> {
        let measurement = self
            .index
            .get(&id)
            .and_then(|key| self.arena.get_mut(*key))
            .ok_or(GridError::UnknownElement {
                kind: "measurement",
                id: id.value(),
            })?;
        Ok(std::mem::replace(&mut measurement.value, value))
    }

    /// Set every voltage measurement at `bus` to `value`. Returns the number updated.
    pub fn set_bus_voltage(&mut self, bus: BusId, value: f64) -> GridResult<usize> {
        match self.set_where(MeasurementTarget::Voltage { bus }, value) {
            0 => Err(GridError::UnknownElement {
                kind: "voltage measurement at bus",
                id: bus.value(),
            }),
            updated => Ok(updated),
        }
    }

    /// Set every flow measurement of `kind` on `branch` at `side` to `value`.
    pub fn set_branch_flow(
        &mut self,
        branch: BranchId,
        kind: MeasurementKind,
        side: Side,
        value: f64,
    ) -> GridResult<usize> {
        let target = MeasurementTarget::flow(kind, branch, side).ok_or_else(|| {
            GridError::Configuration(format!("{} is not a branch flow kind", kind))
        })?;
        match self.set_where(target, value) {
            0 => Err(GridError::UnknownElement {
                kind: "flow measurement on branch",
                id: branch.value(),
            }),
            updated => Ok(updated),
        }
    }

    fn set_where(&mut self, target: MeasurementTarget, value: f64) -> usize {
        let mut updated = 0;
        for measurement in self.arena.values_mut() {
            if measurement.target == target {
                measurement.value = value;
                updated += 1;
            }
        }
        updated
    }

    pub fn count_by_kind(&self) -> KindCounts {
        let mut counts = KindCounts::default();
        for m in self.arena.values() {
            match m.kind() {
                MeasurementKind::Voltage => counts.voltage += 1,
                MeasurementKind::ActivePower => counts.active_power += 1,
                MeasurementKind::ReactivePower => counts.reactive_power += 1,
            }
        }
        counts
    }

    pub fn snapshot(&self) -> MeasurementSnapshot {
        MeasurementSnapshot {
            measurements: self.iter().cloned().collect(),
            next_id: self.next_id,
        }
    }

    /// Replace the contents with `snapshot`. Ids handed out after the snapshot was
    /// taken stay reserved so they are never reissued.
    pub fn restore(&mut self, snapshot: &MeasurementSnapshot) {
        let next_id = self.next_id.max(snapshot.next_id);
        self.clear();
        for measurement in &snapshot.measurements {
            self.store(measurement.clone());
        }
        self.next_id = next_id;
        debug!(count = self.len(), "measurement set restored from snapshot");
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.index.clear();
    }
}

impl FromIterator<Measurement> for MeasurementSet {
    /// Later duplicates of an id replace earlier ones.
    fn from_iter<I: IntoIterator<Item = Measurement>>(iter: I) -> Self {
        let mut set = MeasurementSet::new();
        for measurement in iter {
            if let Some(key) = set.index.remove(&measurement.id) {
                set.arena.remove(key);
            }
            set.store(measurement);
        }
        set
    }
}
