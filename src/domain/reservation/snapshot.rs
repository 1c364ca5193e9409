use serde_json::{Map, Value};

use crate::domain::machine::machine_id::MachineId;
use crate::domain::reservation::reservation_state::ReservationState;

/// Shape of the root document found in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotShape {
    /// Nothing stored yet.
    Empty,

    /// `{"1": "off", "2": "on", ...}`
    Mapping,

    /// `["off", "on", ...]` where index `i` belongs to machine `i + 1`.
    LegacySequence,

    /// Scalar or otherwise unusable root.
    Unsupported,
}

impl SnapshotShape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => SnapshotShape::Empty,
            Value::Object(_) => SnapshotShape::Mapping,
            Value::Array(_) => SnapshotShape::LegacySequence,
            _ => SnapshotShape::Unsupported,
        }
    }
}

/// A root snapshot normalized into machine entries.
#[derive(Debug, Clone)]
pub struct NormalizedSnapshot {
    pub shape: SnapshotShape,
    pub entries: Vec<(MachineId, ReservationState)>,

    /// Entries that were dropped, with the key they arrived under.
    pub rejected: Vec<(String, Value)>,
}

/// Maps a store key onto a machine of a pool with `machine_count` machines.
pub fn parse_key(key: &str, machine_count: usize) -> Option<MachineId> {
    let machine: MachineId = key.parse().ok()?;
    if machine.index() < machine_count { Some(machine) } else { None }
}

/// Normalizes a root document of either shape into ascending machine entries.
pub fn normalize(value: &Value, machine_count: usize) -> NormalizedSnapshot {
    let shape = SnapshotShape::of(value);
    let mut entries = Vec::new();
    let mut rejected = Vec::new();

    let mut accept = |key: String, raw: &Value| match (parse_key(&key, machine_count), ReservationState::from_wire(raw)) {
        (Some(machine), Some(state)) => entries.push((machine, state)),
        _ => rejected.push((key, raw.clone())),
    };

    match value {
        Value::Object(map) => {
            for (key, raw) in map {
                accept(key.clone(), raw);
            }
        }
        Value::Array(items) => {
            for (index, raw) in items.iter().enumerate() {
                // Holes in a legacy sequence carry no information.
                if !raw.is_null() {
                    accept(MachineId::from_index(index).store_key(), raw);
                }
            }
        }
        Value::Null => {}
        other => accept(String::new(), other),
    }

    entries.sort_by_key(|(machine, _)| *machine);
    NormalizedSnapshot { shape, entries, rejected }
}

/// The canonical document: every machine of the pool set to available.
pub fn canonical_root(machine_count: usize) -> Value {
    let map: Map<String, Value> =
        (0..machine_count).map(|i| (MachineId::from_index(i).store_key(), ReservationState::Available.to_wire())).collect();
    Value::Object(map)
}

/// Machines whose entry is absent or unreadable in a mapping shaped root.
pub fn missing_machines(value: &Value, machine_count: usize) -> Vec<MachineId> {
    let Value::Object(map) = value else {
        return (0..machine_count).map(MachineId::from_index).collect();
    };

    (0..machine_count)
        .map(MachineId::from_index)
        .filter(|machine| map.get(&machine.store_key()).and_then(ReservationState::from_wire).is_none())
        .collect()
}
