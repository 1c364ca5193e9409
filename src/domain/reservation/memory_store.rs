use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::machine::machine_id::MachineId;
use crate::domain::reservation::reservation_state::ReservationState;
use crate::domain::reservation::reservation_store::{ReservationStore, StorePath, StoreListener};
use crate::error::{Error, Result};

struct MemoryStoreInner {
    root: Value,
    listeners: Vec<Arc<dyn StoreListener>>,
    reachable: bool,
    writes: usize,
}

/// In-process reservation store.
///
/// Several `ReservationSync` clients can share one `Arc<MemoryReservationStore>` to behave like
/// concurrently running operator instances. Events are delivered on the writer's thread while the
/// store lock is held, which keeps per-key delivery order identical to write order.
pub struct MemoryReservationStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryReservationStore {
    pub fn new() -> Self {
        Self::with_root(Value::Null)
    }

    /// Starts from an existing document, e.g. one written by an older client.
    pub fn with_root(root: Value) -> Self {
        MemoryReservationStore { inner: Mutex::new(MemoryStoreInner { root, listeners: Vec::new(), reachable: true, writes: 0 }) }
    }

    /// Simulates losing (or regaining) the connection to the backend.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Number of successful writes (`set` and `set_root`) since creation.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Delivers a change as if another client had written it, bypassing reachability.
    pub fn push_remote(&self, path: StorePath, value: Value) {
        let mut inner = self.lock();
        match &path {
            StorePath::Root => inner.root = value.clone(),
            StorePath::Key(key) => {
                Self::object_root(&mut inner.root).insert(key.clone(), value.clone());
            }
        }
        Self::deliver(&inner, &path, &value);
    }

    pub fn root(&self) -> Value {
        self.lock().root.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn object_root(root: &mut Value) -> &mut Map<String, Value> {
        if !root.is_object() {
            *root = Value::Object(Map::new());
        }
        match root {
            Value::Object(map) => map,
            _ => unreachable!("root was just replaced by an object"),
        }
    }

    fn deliver(inner: &MemoryStoreInner, path: &StorePath, value: &Value) {
        for listener in &inner.listeners {
            listener.on_store_event(path, value);
        }
    }

    fn ensure_reachable(inner: &MemoryStoreInner) -> Result<()> {
        if inner.reachable { Ok(()) } else { Err(Error::StoreUnavailable("memory store is offline".to_string())) }
    }
}

impl Default for MemoryReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryReservationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryReservationStore")
            .field("root", &inner.root)
            .field("listeners", &inner.listeners.len())
            .field("reachable", &inner.reachable)
            .finish()
    }
}

impl ReservationStore for MemoryReservationStore {
    fn get_all(&self) -> Result<Value> {
        let inner = self.lock();
        Self::ensure_reachable(&inner)?;
        Ok(inner.root.clone())
    }

    fn set(&self, machine: MachineId, state: ReservationState) -> Result<()> {
        let mut inner = self.lock();
        Self::ensure_reachable(&inner)?;

        let value = state.to_wire();
        Self::object_root(&mut inner.root).insert(machine.store_key(), value.clone());
        inner.writes += 1;

        Self::deliver(&inner, &StorePath::machine(machine), &value);
        Ok(())
    }

    fn set_root(&self, value: Value) -> Result<()> {
        let mut inner = self.lock();
        Self::ensure_reachable(&inner)?;

        inner.root = value.clone();
        inner.writes += 1;

        Self::deliver(&inner, &StorePath::Root, &value);
        Ok(())
    }

    fn subscribe(&self, listener: Arc<dyn StoreListener>) -> Result<()> {
        let mut inner = self.lock();
        Self::ensure_reachable(&inner)?;

        listener.on_store_event(&StorePath::Root, &inner.root);
        inner.listeners.push(listener);
        Ok(())
    }
}
