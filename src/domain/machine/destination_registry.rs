use std::path::{Path, PathBuf};

use crate::domain::machine::machine_id::MachineId;

/// Static, ordered mapping from machine id to the directory its job files are staged into.
///
/// Slot `i` belongs to machine `i + 1`. A slot without a path marks a machine that is part of
/// the pool but has no usable destination; it keeps its id so numbering stays stable.
#[derive(Debug, Clone)]
pub struct DestinationRegistry {
    destinations: Vec<Option<PathBuf>>,
}

impl DestinationRegistry {
    pub fn new(destinations: Vec<Option<PathBuf>>) -> Self {
        DestinationRegistry { destinations }
    }

    pub fn from_paths<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        DestinationRegistry { destinations: paths.into_iter().map(|p| Some(p.into())).collect() }
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn contains(&self, machine: MachineId) -> bool {
        machine.index() < self.destinations.len()
    }

    /// Destination directory of `machine`, if the machine exists and has one configured.
    pub fn resolve(&self, machine: MachineId) -> Option<&Path> {
        self.destinations.get(machine.index()).and_then(|d| d.as_deref())
    }

    /// All machines of the pool in ascending order, configured or not.
    pub fn machines(&self) -> impl Iterator<Item = MachineId> + '_ {
        (0..self.destinations.len()).map(MachineId::from_index)
    }

    pub fn misconfigured(&self) -> Vec<MachineId> {
        self.machines().filter(|m| self.resolve(*m).is_none()).collect()
    }
}
