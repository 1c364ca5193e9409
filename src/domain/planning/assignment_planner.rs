use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::domain::machine::machine_id::MachineId;

/// Pairing of one selected machine with the file it should receive in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub machine: MachineId,
    pub file: Option<PathBuf>,
}

impl Assignment {
    pub fn new(machine: MachineId, file: Option<PathBuf>) -> Self {
        Assignment { machine, file }
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

/// Builds the machine to file plan for one batch.
///
/// Machines are sorted ascending and deduplicated, then zipped with `files` by position.
/// Machines beyond the file count receive no file. Surplus files are ignored.
pub fn plan(selected_machines: impl IntoIterator<Item = MachineId>, files: &[PathBuf]) -> Vec<Assignment> {
    let machines: BTreeSet<MachineId> = selected_machines.into_iter().collect();

    if files.len() > machines.len() {
        log::warn!("{} file(s) uploaded for {} selected machine(s); the surplus is not staged.", files.len(), machines.len());
    }

    machines.into_iter().enumerate().map(|(i, machine)| Assignment::new(machine, files.get(i).cloned())).collect()
}
