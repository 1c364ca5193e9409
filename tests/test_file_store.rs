use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use machine_staging::domain::machine::machine_id::MachineId;
use machine_staging::domain::reservation::file_store::FileReservationStore;
use machine_staging::domain::reservation::reservation_state::ReservationState;
use machine_staging::domain::reservation::reservation_sync::{ChangeOrigin, ReservationChange, ReservationSync};

const POLL: Duration = Duration::from_millis(20);
const TIMEOUT: Duration = Duration::from_secs(5);

fn id(n: u32) -> MachineId {
    MachineId::new(n).unwrap()
}

fn read(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn first_client_bootstraps_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reservations.json");

    let sync = ReservationSync::connect(Arc::new(FileReservationStore::new(&path, POLL)), 3).unwrap();

    assert_eq!(read(&path), json!({"1": "off", "2": "off", "3": "off"}));
    assert_eq!(sync.snapshot().len(), 3);
}

#[test]
fn legacy_file_is_migrated_to_a_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reservations.json");
    fs::write(&path, r#"["on", "on"]"#).unwrap();

    let sync = ReservationSync::connect(Arc::new(FileReservationStore::new(&path, POLL)), 2).unwrap();

    assert_eq!(read(&path), json!({"1": "off", "2": "off"}));
    assert_eq!(sync.state(id(1)), ReservationState::Available);
}

#[test]
fn own_toggle_is_settled_by_the_local_echo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reservations.json");
    let sync = ReservationSync::connect(Arc::new(FileReservationStore::new(&path, POLL)), 3).unwrap();

    assert_eq!(sync.toggle(id(1)).unwrap(), ReservationState::Reserved);

    assert!(!sync.is_pending(id(1)));
    assert_eq!(read(&path)["1"], json!("on"));
    assert_eq!(sync.selection(), vec![id(1)]);
}

#[test]
fn changes_propagate_between_clients_of_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reservations.json");

    let alice = ReservationSync::connect(Arc::new(FileReservationStore::new(&path, POLL)), 4).unwrap();
    let bob = ReservationSync::connect(Arc::new(FileReservationStore::new(&path, POLL)), 4).unwrap();
    let changes = bob.watch();

    alice.toggle(id(3)).unwrap();

    let change = changes.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(change, ReservationChange { machine: id(3), state: ReservationState::Reserved, origin: ChangeOrigin::Remote });
    assert_eq!(bob.state(id(3)), ReservationState::Reserved);
    assert!(bob.selection().is_empty());
}

#[test]
fn external_edit_of_the_file_is_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reservations.json");

    let sync = ReservationSync::connect(Arc::new(FileReservationStore::new(&path, POLL)), 2).unwrap();
    let changes = sync.watch();

    fs::write(&path, r#"{"1": "off", "2": "on"}"#).unwrap();

    let change = changes.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(change.machine, id(2));
    assert_eq!(change.state, ReservationState::Reserved);
}
