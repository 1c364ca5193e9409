use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak, mpsc};

use crate::domain::machine::machine_id::MachineId;
use crate::domain::reservation::reservation_state::ReservationState;
use crate::domain::reservation::reservation_store::{ReservationStore, StoreListener, StorePath};
use crate::domain::reservation::snapshot::{self, SnapshotShape};
use crate::error::{Error, Result};

/// Where an effective cache change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// One effective change of the local reservation cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationChange {
    pub machine: MachineId,
    pub state: ReservationState,
    pub origin: ChangeOrigin,
}

#[derive(Debug, Default)]
struct SyncInner {
    cache: BTreeMap<MachineId, ReservationState>,

    /// Value of the last write this instance issued per machine whose echo has not arrived yet.
    pending: HashMap<MachineId, ReservationState>,

    /// Machines this instance reserved and still holds. Follows this instance's own writes; a
    /// remote `off` removes an entry, a remote `on` never adds one.
    held: BTreeSet<MachineId>,

    watchers: Vec<mpsc::Sender<ReservationChange>>,
}

impl SyncInner {
    fn record(&mut self, machine: MachineId, state: ReservationState, origin: ChangeOrigin) {
        let previous = self.cache.insert(machine, state);
        if previous == Some(state) {
            return;
        }

        let change = ReservationChange { machine, state, origin };
        self.watchers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// Client side of the shared reservation state.
///
/// Owns the local cache of `MachineId -> ReservationState` and is its only writer. Local toggles
/// are written through to the store, remote pushes are applied without ever writing back. Both
/// paths serialize on one mutex because the store delivers on its own thread.
///
/// Echo handling: a toggle records the value it wrote as pending for that machine. While a write
/// is pending, remote values that differ from it are older than the write and are ignored; the
/// matching echo clears the marker. Applying a value is an assignment, so duplicate deliveries
/// are harmless.
///
/// Toggles of one instance are serialized, so at most one own write per machine is in flight and
/// `selection()` always agrees with the last value this instance wrote.
pub struct ReservationSync {
    store: Arc<dyn ReservationStore>,
    machine_count: usize,
    inner: Mutex<SyncInner>,

    /// Held across a whole toggle. Store deliveries never take it.
    write_gate: Mutex<()>,
}

impl ReservationSync {
    /// Creates a detached client. Every machine starts as available until the store says otherwise.
    pub fn new(store: Arc<dyn ReservationStore>, machine_count: usize) -> Arc<Self> {
        let cache = (0..machine_count).map(|i| (MachineId::from_index(i), ReservationState::Available)).collect();
        Arc::new(ReservationSync {
            store,
            machine_count,
            inner: Mutex::new(SyncInner { cache, ..Default::default() }),
            write_gate: Mutex::new(()),
        })
    }

    /// Creates a client, bootstraps the store shape and subscribes to its push feed.
    pub fn connect(store: Arc<dyn ReservationStore>, machine_count: usize) -> Result<Arc<Self>> {
        let sync = Self::new(store, machine_count);
        sync.bootstrap()?;
        sync.subscribe()?;
        Ok(sync)
    }

    /// Registers this client with the store's push feed. The store delivers the full snapshot
    /// first, which is applied entry by entry like any other remote change.
    pub fn subscribe(self: &Arc<Self>) -> Result<()> {
        let listener = Arc::new(SyncListener { sync: Arc::downgrade(self) });
        self.store.subscribe(listener)
    }

    /// Makes sure the store holds the canonical mapping of every machine.
    ///
    /// An empty, legacy sequence or scalar root is replaced by the all-available mapping. A mapping
    /// with gaps only gets its missing entries filled. Returns `false` when nothing was written.
    pub fn bootstrap(&self) -> Result<bool> {
        let root = self.store.get_all()?;

        match SnapshotShape::of(&root) {
            SnapshotShape::Mapping => {
                let missing = snapshot::missing_machines(&root, self.machine_count);
                if missing.is_empty() {
                    log::debug!("Reservation store already holds the canonical mapping.");
                    return Ok(false);
                }

                log::info!("Reservation store is missing {} machine entries; filling them as available.", missing.len());
                for machine in missing {
                    self.store.set(machine, ReservationState::Available)?;
                }
                Ok(true)
            }
            shape => {
                log::info!("Reservation store root is {:?}; writing canonical mapping for {} machines.", shape, self.machine_count);
                self.store.set_root(snapshot::canonical_root(self.machine_count))?;
                Ok(true)
            }
        }
    }

    /// Flips the local state of `machine` and writes the new value to the store.
    ///
    /// When the write fails the local value is restored and the store error is returned; the caller
    /// decides whether to retry.
    pub fn toggle(&self, machine: MachineId) -> Result<ReservationState> {
        if machine.index() >= self.machine_count {
            return Err(Error::UnknownMachine(machine));
        }

        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let (previous, next) = {
            let mut inner = self.lock();
            let previous = inner.cache.get(&machine).copied().unwrap_or_default();
            let next = previous.toggled();

            inner.pending.insert(machine, next);
            match next {
                ReservationState::Reserved => inner.held.insert(machine),
                ReservationState::Available => inner.held.remove(&machine),
            };
            inner.record(machine, next, ChangeOrigin::Local);
            (previous, next)
        };

        log::debug!("Machine {} toggled to '{}', writing to store.", machine, next);

        if let Err(e) = self.store.set(machine, next) {
            log::warn!("Failed to write reservation of machine {}: {}. Keeping '{}'.", machine, e, previous);

            let mut inner = self.lock();
            if inner.pending.get(&machine) == Some(&next) {
                inner.pending.remove(&machine);
                if inner.cache.get(&machine) == Some(&next) {
                    match previous {
                        ReservationState::Reserved => inner.held.insert(machine),
                        ReservationState::Available => inner.held.remove(&machine),
                    };
                    inner.record(machine, previous, ChangeOrigin::Local);
                }
            }
            return Err(e);
        }

        Ok(next)
    }

    /// Applies a change pushed by the store. Never writes back to the store.
    pub fn on_remote_change(&self, machine: MachineId, state: ReservationState) {
        if machine.index() >= self.machine_count {
            log::warn!("Dropping remote update for unknown machine {}.", machine);
            return;
        }

        let mut inner = self.lock();

        if let Some(&pending) = inner.pending.get(&machine) {
            if pending != state {
                log::debug!("Ignoring '{}' for machine {} while own write of '{}' is in flight.", state, machine, pending);
                return;
            }
            log::debug!("Echo of own write for machine {} observed.", machine);
            inner.pending.remove(&machine);
        }

        if state == ReservationState::Available && inner.held.remove(&machine) {
            log::info!("Machine {} was released remotely.", machine);
        }
        inner.record(machine, state, ChangeOrigin::Remote);
    }

    /// Applies a root snapshot of either shape, entry by entry.
    pub fn apply_snapshot(&self, value: &Value) {
        let normalized = snapshot::normalize(value, self.machine_count);

        for (key, raw) in &normalized.rejected {
            log::warn!("Dropping malformed reservation entry '{}': {}", key, raw);
        }
        for (machine, state) in normalized.entries {
            self.on_remote_change(machine, state);
        }
    }

    fn handle_store_event(&self, path: &StorePath, value: &Value) {
        match path {
            StorePath::Root => self.apply_snapshot(value),
            StorePath::Key(key) => {
                let Some(machine) = snapshot::parse_key(key, self.machine_count) else {
                    log::warn!("Dropping reservation update for unknown key {}: {}", path, value);
                    return;
                };
                let Some(state) = ReservationState::from_wire(value) else {
                    log::warn!("Dropping malformed reservation update at {}: {}", path, value);
                    return;
                };
                self.on_remote_change(machine, state);
            }
        }
    }

    /// Sets every machine held by this instance back to available.
    pub fn release_all(&self) -> Result<()> {
        let held: Vec<MachineId> = self.lock().held.iter().copied().collect();

        for machine in held {
            if self.state(machine) == ReservationState::Reserved {
                self.toggle(machine)?;
            }
        }
        Ok(())
    }

    pub fn state(&self, machine: MachineId) -> ReservationState {
        self.lock().cache.get(&machine).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<MachineId, ReservationState> {
        self.lock().cache.clone()
    }

    /// Machines this instance has reserved and still holds, ascending.
    pub fn selection(&self) -> Vec<MachineId> {
        self.lock().held.iter().copied().collect()
    }

    pub fn is_pending(&self, machine: MachineId) -> bool {
        self.lock().pending.contains_key(&machine)
    }

    pub fn machine_count(&self) -> usize {
        self.machine_count
    }

    /// Stream of every effective change of the local cache, local or remote.
    pub fn watch(&self) -> mpsc::Receiver<ReservationChange> {
        let (tx, rx) = mpsc::channel();
        self.lock().watchers.push(tx);
        rx
    }

    /// `Machine N: on|off` for every machine.
    pub fn summary_lines(&self) -> Vec<String> {
        self.lock().cache.iter().map(|(machine, state)| format!("Machine {}: {}", machine, state)).collect()
    }

    fn lock(&self) -> MutexGuard<'_, SyncInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ReservationSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ReservationSync")
            .field("machine_count", &self.machine_count)
            .field("held", &inner.held)
            .field("pending", &inner.pending)
            .finish()
    }
}

/// Bridges the store's push feed to a `ReservationSync` without keeping it alive.
struct SyncListener {
    sync: Weak<ReservationSync>,
}

impl StoreListener for SyncListener {
    fn on_store_event(&self, path: &StorePath, value: &Value) {
        if let Some(sync) = self.sync.upgrade() {
            sync.handle_store_event(path, value);
        }
    }
}
