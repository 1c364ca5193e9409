use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use machine_staging::domain::distribution::cleanup_pattern::CleanupPattern;
use machine_staging::domain::distribution::distribution_engine::DistributionEngine;
use machine_staging::domain::distribution::progress::{BatchEvent, TransferFailure, TransferOutcome};
use machine_staging::domain::machine::destination_registry::DestinationRegistry;
use machine_staging::domain::machine::machine_id::MachineId;
use machine_staging::domain::planning::assignment_planner;
use machine_staging::domain::reservation::file_store::FileReservationStore;
use machine_staging::domain::reservation::memory_store::MemoryReservationStore;
use machine_staging::domain::reservation::reservation_state::ReservationState;
use machine_staging::domain::reservation::reservation_sync::ReservationSync;
use machine_staging::domain::staging;
use machine_staging::error::Error;

fn id(n: u32) -> MachineId {
    MachineId::new(n).unwrap()
}

/// Two machines with existing destination directories and one uploaded file.
fn setup() -> (TempDir, DistributionEngine, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let destinations: Vec<Option<PathBuf>> = (1..=2)
        .map(|n| {
            let path = dir.path().join(format!("machine-{}", n));
            fs::create_dir(&path).unwrap();
            Some(path)
        })
        .collect();
    let upload = dir.path().join("a.pdf");
    fs::write(&upload, b"payload").unwrap();

    let engine = DistributionEngine::new(Arc::new(DestinationRegistry::new(destinations)), CleanupPattern::default());
    (dir, engine, upload)
}

#[test]
fn invalid_concurrency_reserves_nothing() {
    let (_dir, engine, upload) = setup();
    let store = Arc::new(MemoryReservationStore::new());
    let sync = ReservationSync::connect(store.clone(), 2).unwrap();
    let writes_before = store.write_count();

    let assignments = assignment_planner::plan([id(1)], &[upload]);
    let result = staging::stage(&sync, &engine, &assignments, 0, false, |_| {});

    assert!(matches!(result, Err(Error::InvalidConcurrency(0))));
    assert_eq!(store.write_count(), writes_before);
    assert_eq!(store.root(), json!({"1": "off", "2": "off"}));
}

#[test]
fn empty_selection_and_unknown_machine_are_rejected_up_front() {
    let (_dir, engine, upload) = setup();
    let store = Arc::new(MemoryReservationStore::new());
    let sync = ReservationSync::connect(store.clone(), 2).unwrap();
    let writes_before = store.write_count();

    assert!(matches!(staging::stage(&sync, &engine, &[], 2, false, |_| {}), Err(Error::EmptySelection)));

    let assignments = assignment_planner::plan([id(1), id(3)], &[upload]);
    assert!(matches!(staging::stage(&sync, &engine, &assignments, 2, false, |_| {}), Err(Error::UnknownMachine(_))));
    assert_eq!(store.write_count(), writes_before);
}

#[test]
fn reservations_are_released_after_staging() {
    let (dir, engine, upload) = setup();
    let store = Arc::new(MemoryReservationStore::new());
    let sync = ReservationSync::connect(store.clone(), 2).unwrap();

    let mut completed = 0;
    let assignments = assignment_planner::plan([id(1)], &[upload]);
    let report = staging::stage(&sync, &engine, &assignments, 2, false, |event| {
        if let BatchEvent::Completed(_) = event {
            completed += 1;
        }
    })
    .unwrap();

    assert_eq!(completed, 1);
    assert!(report.is_success());
    assert!(dir.path().join("machine-1").join("a.pdf").is_file());
    assert_eq!(store.root(), json!({"1": "off", "2": "off"}));
    assert!(sync.selection().is_empty());
}

#[test]
fn failed_transfer_still_releases_reservations() {
    let (dir, engine, _upload) = setup();
    let store = Arc::new(MemoryReservationStore::new());
    let sync = ReservationSync::connect(store.clone(), 2).unwrap();

    let assignments = assignment_planner::plan([id(2)], &[dir.path().join("missing.pdf")]);
    let report = staging::stage(&sync, &engine, &assignments, 1, false, |_| {}).unwrap();

    assert!(matches!(report.outcome(id(2)), Some(TransferOutcome::Failed(TransferFailure::Copy(_)))));
    assert_eq!(store.root()["2"], json!("off"));
}

#[test]
fn keep_reserved_leaves_machines_reserved() {
    let (_dir, engine, upload) = setup();
    let store = Arc::new(MemoryReservationStore::new());
    let sync = ReservationSync::connect(store.clone(), 2).unwrap();

    let assignments = assignment_planner::plan([id(1), id(2)], &[upload]);
    staging::stage(&sync, &engine, &assignments, 2, true, |_| {}).unwrap();

    assert_eq!(store.root(), json!({"1": "on", "2": "on"}));
    assert_eq!(sync.selection(), vec![id(1), id(2)]);
}

#[test]
fn unreachable_store_reports_error_without_staging() {
    let (dir, engine, upload) = setup();
    let store = Arc::new(MemoryReservationStore::new());
    let sync = ReservationSync::connect(store.clone(), 2).unwrap();
    store.set_reachable(false);

    let assignments = assignment_planner::plan([id(1)], &[upload]);
    let result = staging::stage(&sync, &engine, &assignments, 2, false, |_| {});

    assert!(matches!(result, Err(Error::StoreUnavailable(_))));
    assert!(!dir.path().join("machine-1").join("a.pdf").exists());
    assert!(sync.selection().is_empty());
}

#[test]
fn machine_reserved_by_an_earlier_toggle_can_be_staged() {
    let (dir, engine, upload) = setup();
    let path = dir.path().join("reservations.json");
    let poll = Duration::from_millis(20);

    // First invocation: `toggle 1`.
    {
        let sync = ReservationSync::connect(Arc::new(FileReservationStore::new(&path, poll)), 2).unwrap();
        assert_eq!(sync.toggle(id(1)).unwrap(), ReservationState::Reserved);
    }

    // Second invocation: `stage -m 1,2 -f a.pdf b.pdf`.
    let second = dir.path().join("b.pdf");
    fs::write(&second, b"second").unwrap();
    let sync = ReservationSync::connect(Arc::new(FileReservationStore::new(&path, poll)), 2).unwrap();
    let assignments = assignment_planner::plan([id(1), id(2)], &[upload, second]);
    let report = staging::stage(&sync, &engine, &assignments, 2, false, |_| {}).unwrap();

    assert!(report.is_success());
    assert!(dir.path().join("machine-1").join("a.pdf").is_file());
    assert!(dir.path().join("machine-2").join("b.pdf").is_file());

    // The earlier reservation stays, the one made for staging is released.
    let stored: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(stored, json!({"1": "on", "2": "off"}));
}
