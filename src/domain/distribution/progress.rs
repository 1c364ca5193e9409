use thiserror::Error;

use crate::domain::distribution::batch_report::BatchReport;
use crate::domain::machine::machine_id::MachineId;

/// Reason a single destination could not be staged. The message is what operators see.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error("no destination configured")]
    NoDestination,

    #[error("destination missing")]
    DestinationMissing,

    #[error("cleanup error: {0}")]
    Cleanup(String),

    #[error("copy error: {0}")]
    Copy(String),

    #[error("transfer aborted: {0}")]
    Aborted(String),
}

/// Event emitted by a transfer. Reaching `Progress(1.0)` without a failure means success.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress(f64),
    Failed(TransferFailure),
}

/// Lifecycle of one assignment within a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Pending,
    Copying(f64),
    Succeeded,
    Failed(TransferFailure),

    /// The machine was selected but no file was uploaded for it. Not a failure.
    NoFileAssigned,
}

impl TransferOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferOutcome::Pending | TransferOutcome::Copying(_))
    }
}

/// Item of the progress feed of a batch.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Transfer { machine: MachineId, event: ProgressEvent },

    /// Sent exactly once, after every transfer of the batch reached a terminal state.
    Completed(BatchReport),
}
