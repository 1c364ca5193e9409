use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::domain::machine::machine_id::MachineId;
use crate::domain::reservation::reservation_state::ReservationState;
use crate::error::Result;

/// Location of a change delivered by the store's push feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorePath {
    /// The whole document; used for the initial snapshot and for shape changes.
    Root,

    /// A single machine entry, keyed by its store key (`"1"`, `"2"`, ...).
    Key(String),
}

impl StorePath {
    pub fn machine(machine: MachineId) -> Self {
        StorePath::Key(machine.store_key())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorePath::Root => write!(f, "/"),
            StorePath::Key(key) => write!(f, "/{}", key),
        }
    }
}

/// Receiver of the store's push feed.
///
/// Callbacks run on the store's delivery thread. A listener must not call back into the
/// store that is delivering to it.
pub trait StoreListener: Send + Sync {
    fn on_store_event(&self, path: &StorePath, value: &Value);
}

/// Shared key/value store holding the canonical reservation state of every machine.
///
/// Payloads are untyped JSON because the store may hold data written by older clients.
/// Implementations must deliver every successful write made through a handle to that
/// handle's subscribers, in write order per key, and must deliver the full root document
/// to a new subscriber before any delta.
pub trait ReservationStore: Send + Sync {
    fn get_all(&self) -> Result<Value>;

    fn set(&self, machine: MachineId, state: ReservationState) -> Result<()>;

    /// Replaces the whole document. Only used to bootstrap or migrate the store shape.
    fn set_root(&self, value: Value) -> Result<()>;

    fn subscribe(&self, listener: Arc<dyn StoreListener>) -> Result<()>;
}
