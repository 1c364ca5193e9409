use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::distribution::progress::{TransferFailure, TransferOutcome};
use crate::domain::machine::machine_id::MachineId;
use crate::domain::planning::assignment_planner::Assignment;

/// Result of one distribution batch. Owned by the caller once the batch completed.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub outcomes: BTreeMap<MachineId, TransferOutcome>,

    /// Failure reason per machine, for display.
    pub failures: BTreeMap<MachineId, TransferFailure>,

    /// Highest number of transfers that ran at the same time.
    pub peak_concurrency: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn outcome(&self, machine: MachineId) -> Option<&TransferOutcome> {
        self.outcomes.get(&machine)
    }

    pub fn succeeded(&self) -> Vec<MachineId> {
        self.machines_where(|o| *o == TransferOutcome::Succeeded)
    }

    pub fn without_file(&self) -> Vec<MachineId> {
        self.machines_where(|o| *o == TransferOutcome::NoFileAssigned)
    }

    /// `assignments` minus every machine that failed in this batch.
    pub fn rerun_assignments(&self, assignments: &[Assignment]) -> Vec<Assignment> {
        assignments.iter().filter(|a| !self.failures.contains_key(&a.machine)).cloned().collect()
    }

    fn machines_where(&self, predicate: impl Fn(&TransferOutcome) -> bool) -> Vec<MachineId> {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).map(|(m, _)| *m).collect()
    }
}

/// Mutable per-batch bookkeeping shared by the workers of a running batch.
#[derive(Debug, Default)]
pub(crate) struct BatchState {
    pub outcomes: BTreeMap<MachineId, TransferOutcome>,
    pub failures: BTreeMap<MachineId, TransferFailure>,
}

impl BatchState {
    pub fn set(&mut self, machine: MachineId, outcome: TransferOutcome) {
        if let TransferOutcome::Failed(failure) = &outcome {
            self.failures.insert(machine, failure.clone());
        }
        self.outcomes.insert(machine, outcome);
    }

    /// Machines whose transfer never reached a terminal state.
    pub fn unfinished(&self) -> Vec<MachineId> {
        self.outcomes.iter().filter(|(_, o)| !o.is_terminal()).map(|(m, _)| *m).collect()
    }

    pub fn into_report(self, batch_id: Uuid, peak_concurrency: usize, elapsed: Duration) -> BatchReport {
        BatchReport { batch_id, outcomes: self.outcomes, failures: self.failures, peak_concurrency, elapsed }
    }
}
