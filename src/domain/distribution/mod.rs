pub mod batch_report;
pub mod cleanup_pattern;
pub mod distribution_engine;
pub mod progress;
pub mod transfer_job;
