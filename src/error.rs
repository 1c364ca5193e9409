use thiserror::Error;

use crate::domain::machine::machine_id::MachineId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse staging JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Invalid staging configuration: {0}")]
    ConfigError(String),

    #[error("Invalid cleanup pattern: {0}")]
    InvalidCleanupPattern(#[from] globset::Error),

    #[error("Reservation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Unknown machine: {0}")]
    UnknownMachine(MachineId),

    #[error("No machine selected")]
    EmptySelection,

    #[error("Concurrency limit must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error("Distribution batch aborted: {0}")]
    BatchAborted(String),
}

pub type Result<T> = std::result::Result<T, Error>;
