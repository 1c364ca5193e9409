use serde_json::{Map, Value};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;

use crate::domain::machine::machine_id::MachineId;
use crate::domain::reservation::reservation_state::ReservationState;
use crate::domain::reservation::reservation_store::{ReservationStore, StoreListener, StorePath};
use crate::error::{Error, Result};
use crate::loader::parser::read_json_value;

const LOCK_ATTEMPTS: u32 = 200;
const LOCK_RETRY: Duration = Duration::from_millis(10);
const STALE_LOCK_AGE: Duration = Duration::from_secs(5);

struct FileStoreState {
    /// Document as last delivered to the listeners of this handle.
    last_seen: Value,
    listeners: Vec<Arc<dyn StoreListener>>,
    poller_started: bool,
}

struct FileStoreShared {
    path: PathBuf,
    state: Mutex<FileStoreState>,
}

/// Reservation store kept in a JSON file on storage shared by all operator machines.
///
/// Writes are read-modify-write cycles guarded by a lock file and published with an atomic rename.
/// Changes made by other processes are picked up by a poller thread and delivered as per-key
/// deltas, or as a root event when the document shape changed.
pub struct FileReservationStore {
    shared: Arc<FileStoreShared>,
    poll_interval: Duration,
}

impl FileReservationStore {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let state = FileStoreState { last_seen: Value::Null, listeners: Vec::new(), poller_started: false };
        FileReservationStore { shared: Arc::new(FileStoreShared { path: path.into(), state: Mutex::new(state) }), poll_interval }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    fn start_poller(&self) -> Result<()> {
        let shared: Weak<FileStoreShared> = Arc::downgrade(&self.shared);
        let interval = self.poll_interval;

        thread::Builder::new()
            .name("reservation-poller".to_string())
            .spawn(move || {
                log::debug!("Reservation file poller started.");
                loop {
                    thread::sleep(interval);
                    let Some(shared) = shared.upgrade() else { break };
                    shared.poll();
                }
                log::debug!("Reservation file poller stopped.");
            })
            .map_err(|e| Error::StoreUnavailable(format!("failed to start poller: {}", e)))?;
        Ok(())
    }

    fn write(&self, path: StorePath, update: impl FnOnce(&mut Value) -> Value) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let _guard = FileLock::acquire(&shared.path)?;

        let mut root = shared.read()?;
        let delivered = update(&mut root);
        shared.publish(&root)?;

        // Changes of other processes that slipped in before this write are delivered first.
        if let StorePath::Key(key) = &path {
            let mut before = root.clone();
            if let Value::Object(map) = &mut before {
                match state.last_seen.get(key) {
                    Some(old) => map.insert(key.clone(), old.clone()),
                    None => map.remove(key),
                };
            }
            FileStoreShared::deliver_diff(&mut state, &before);
        }

        state.last_seen = root;
        for listener in &state.listeners {
            listener.on_store_event(&path, &delivered);
        }
        Ok(())
    }
}

impl FileStoreShared {
    fn lock_state(&self) -> MutexGuard<'_, FileStoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unavailable(&self, e: impl fmt::Display) -> Error {
        Error::StoreUnavailable(format!("{}: {}", self.path.display(), e))
    }

    fn read(&self) -> Result<Value> {
        read_json_value(&self.path).map_err(|e| self.unavailable(e))
    }

    /// Writes `root` to a temp file next to the store and renames it into place. The temp file is
    /// removed on every error path.
    fn publish(&self, root: &Value) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| self.unavailable(e))?;
        serde_json::to_writer_pretty(&mut tmp, root).map_err(|e| self.unavailable(e))?;
        tmp.flush().map_err(|e| self.unavailable(e))?;
        tmp.persist(&self.path).map_err(|e| self.unavailable(e.error))?;
        Ok(())
    }

    fn poll(&self) {
        let mut state = self.lock_state();
        match self.read() {
            Ok(current) => Self::deliver_diff(&mut state, &current),
            Err(e) => log::warn!("Polling reservation store failed: {}", e),
        }
    }

    /// Delivers the difference between the last seen document and `current`.
    fn deliver_diff(state: &mut FileStoreState, current: &Value) {
        if &state.last_seen == current {
            return;
        }

        let events: Vec<(StorePath, Value)> = match (&state.last_seen, current) {
            (Value::Object(old), Value::Object(new)) => {
                let mut events: Vec<(StorePath, Value)> =
                    new.iter().filter(|(k, v)| old.get(*k) != Some(*v)).map(|(k, v)| (StorePath::Key(k.clone()), v.clone())).collect();
                events.extend(old.keys().filter(|k| !new.contains_key(*k)).map(|k| (StorePath::Key(k.clone()), Value::Null)));
                events
            }
            _ => vec![(StorePath::Root, current.clone())],
        };

        state.last_seen = current.clone();
        for (path, value) in &events {
            for listener in &state.listeners {
                listener.on_store_event(path, value);
            }
        }
    }
}

impl fmt::Debug for FileReservationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileReservationStore").field("path", &self.shared.path).field("poll_interval", &self.poll_interval).finish()
    }
}

impl ReservationStore for FileReservationStore {
    fn get_all(&self) -> Result<Value> {
        self.shared.read()
    }

    fn set(&self, machine: MachineId, state: ReservationState) -> Result<()> {
        let key = machine.store_key();
        let value = state.to_wire();

        self.write(StorePath::Key(key.clone()), |root| {
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            if let Value::Object(map) = root {
                map.insert(key, value.clone());
            }
            value
        })
    }

    fn set_root(&self, value: Value) -> Result<()> {
        self.write(StorePath::Root, |root| {
            *root = value.clone();
            value
        })
    }

    fn subscribe(&self, listener: Arc<dyn StoreListener>) -> Result<()> {
        let start_poller = {
            let mut state = self.shared.lock_state();
            let current = self.shared.read()?;
            FileStoreShared::deliver_diff(&mut state, &current);

            listener.on_store_event(&StorePath::Root, &current);
            state.listeners.push(listener);

            !std::mem::replace(&mut state.poller_started, true)
        };

        if start_poller {
            self.start_poller()?;
        }
        Ok(())
    }
}

/// Cross-process write lock next to the store file. Removed on drop.
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(store_path: &Path) -> Result<Self> {
        let file_name = store_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let path = store_path.with_file_name(format!("{}.lock", file_name));

        for _ in 0..LOCK_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(FileLock { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        log::warn!("Removing stale reservation lock {}.", path.display());
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(Error::StoreUnavailable(format!("{}: {}", path.display(), e))),
            }
        }

        Err(Error::StoreUnavailable(format!("timed out waiting for {}", path.display())))
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > STALE_LOCK_AGE)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_creates_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReservationStore::new(dir.path().join("reservations.json"), Duration::from_millis(20));

        store.set(MachineId::new(2).unwrap(), ReservationState::Reserved).unwrap();

        assert_eq!(store.get_all().unwrap(), json!({"2": "on"}));
        assert!(!dir.path().join("reservations.json.lock").exists());
    }

    #[test]
    fn set_root_replaces_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reservations.json");
        fs::write(&path, r#"["on", "off"]"#).unwrap();
        let store = FileReservationStore::new(&path, Duration::from_millis(20));

        store.set_root(json!({"1": "off", "2": "off"})).unwrap();
        assert_eq!(store.get_all().unwrap(), json!({"1": "off", "2": "off"}));
    }

    #[test]
    fn failed_publish_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reservations.json");
        fs::create_dir(&path).unwrap();
        let store = FileReservationStore::new(&path, Duration::from_millis(20));

        let result = store.shared.publish(&json!({"1": "on"}));

        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("reservations.json")]);
    }

    #[test]
    fn repeated_writes_leave_only_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReservationStore::new(dir.path().join("reservations.json"), Duration::from_millis(20));

        for n in 1..=5 {
            store.set(MachineId::new(n).unwrap(), ReservationState::Reserved).unwrap();
        }

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("reservations.json")]);
    }

    #[test]
    fn unreadable_document_is_reported_as_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reservations.json");
        fs::write(&path, "{broken").unwrap();
        let store = FileReservationStore::new(&path, Duration::from_millis(20));

        assert!(matches!(store.get_all(), Err(Error::StoreUnavailable(_))));
    }
}
