use crate::domain::distribution::batch_report::BatchReport;
use crate::domain::distribution::distribution_engine::DistributionEngine;
use crate::domain::distribution::progress::BatchEvent;
use crate::domain::machine::machine_id::MachineId;
use crate::domain::planning::assignment_planner::Assignment;
use crate::domain::reservation::reservation_state::ReservationState;
use crate::domain::reservation::reservation_sync::ReservationSync;
use crate::error::{Error, Result};

/// Reserves the machines of `assignments`, distributes the files and releases the reservations.
///
/// Everything that can be checked up front (selection, machine ids, `max_concurrency`) is checked
/// before the first reservation is written. Machines that are already reserved are staged as they
/// are; the store has no owner field, so a reservation made earlier (e.g. by `toggle`) counts as
/// the operator's own. Only machines reserved by this call are released, on every exit path,
/// unless `keep_reserved` is set.
///
/// `on_event` sees every event of the batch, `Completed` included.
pub fn stage(
    sync: &ReservationSync,
    engine: &DistributionEngine,
    assignments: &[Assignment],
    max_concurrency: usize,
    keep_reserved: bool,
    on_event: impl FnMut(&BatchEvent),
) -> Result<BatchReport> {
    if assignments.is_empty() {
        return Err(Error::EmptySelection);
    }
    if max_concurrency == 0 {
        return Err(Error::InvalidConcurrency(max_concurrency));
    }
    if let Some(unknown) = assignments.iter().map(|a| a.machine).find(|m| m.index() >= sync.machine_count()) {
        return Err(Error::UnknownMachine(unknown));
    }

    let held_before = sync.selection();
    let result = reserve(sync, assignments).and_then(|()| distribute(engine, assignments, max_concurrency, on_event));

    if keep_reserved {
        return result;
    }

    let release = release(sync, &held_before);
    match (result, release) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_error)) => {
            log::warn!("Failed to release reservations after error: {}", release_error);
            Err(e)
        }
    }
}

fn reserve(sync: &ReservationSync, assignments: &[Assignment]) -> Result<()> {
    for assignment in assignments {
        let machine = assignment.machine;
        if sync.state(machine) == ReservationState::Available {
            sync.toggle(machine)?;
            log::info!("Reserved machine {} for staging.", machine);
        } else {
            log::info!("Machine {} is already reserved; staging onto it.", machine);
        }
    }
    Ok(())
}

fn distribute(
    engine: &DistributionEngine,
    assignments: &[Assignment],
    max_concurrency: usize,
    mut on_event: impl FnMut(&BatchEvent),
) -> Result<BatchReport> {
    let batch = engine.run(assignments, max_concurrency)?;
    for event in batch.events() {
        on_event(&event);
    }
    batch.wait()
}

/// Releases what this instance holds now but did not hold before staging.
fn release(sync: &ReservationSync, held_before: &[MachineId]) -> Result<()> {
    let mut first_error = None;

    for machine in sync.selection() {
        if held_before.contains(&machine) || sync.state(machine) != ReservationState::Reserved {
            continue;
        }
        if let Err(e) = sync.toggle(machine) {
            log::warn!("Failed to release machine {}: {}", machine, e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
