use serde::Deserialize;

use crate::domain::distribution::cleanup_pattern::DEFAULT_CLEANUP_PATTERN;
use crate::domain::distribution::transfer_job::DEFAULT_CHUNK_SIZE;
use crate::domain::staging_config::{DEFAULT_LOG_DIR, DEFAULT_MAX_CONCURRENCY, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STORE_PATH};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingConfigDto {
    /// Index `i` is the destination of machine `i + 1`; `null` marks a machine without one.
    pub destinations: Vec<Option<String>>,

    #[serde(default = "default_cleanup_pattern")]
    pub cleanup_pattern: String,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,

    #[serde(default = "default_store_path")]
    pub store_path: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_cleanup_pattern() -> String {
    DEFAULT_CLEANUP_PATTERN.to_string()
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_store_path() -> String {
    DEFAULT_STORE_PATH.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.to_string()
}
