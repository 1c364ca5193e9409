use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::staging_config_dto::StagingConfigDto;
use crate::domain::distribution::cleanup_pattern::CleanupPattern;
use crate::domain::distribution::transfer_job::DEFAULT_CHUNK_SIZE;
use crate::domain::machine::destination_registry::DestinationRegistry;
use crate::error::{Error, Result};
use crate::loader::parser::parse_json_file;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_STORE_PATH: &str = "reservations.json";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Size of the machine pool when no configuration is available (the operator grid holds 30).
pub const DEFAULT_MACHINE_COUNT: usize = 30;

/// Validated staging configuration.
#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub registry: DestinationRegistry,
    pub cleanup_pattern: CleanupPattern,
    pub max_concurrency: usize,
    pub chunk_size: usize,
    pub store_path: PathBuf,
    pub poll_interval: Duration,
    pub log_dir: PathBuf,
}

impl StagingConfig {
    /// Configuration with default settings for the given destinations.
    pub fn with_destinations(destinations: Vec<Option<PathBuf>>) -> Self {
        StagingConfig {
            registry: DestinationRegistry::new(destinations),
            cleanup_pattern: CleanupPattern::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let dto: StagingConfigDto = parse_json_file(path.as_ref())?;
        let config = StagingConfig::try_from(dto)?;
        log::info!(
            "Loaded staging configuration for {} machines ({} without destination).",
            config.registry.len(),
            config.registry.misconfigured().len()
        );
        Ok(config)
    }

    pub fn machine_count(&self) -> usize {
        self.registry.len()
    }
}

/// A pool of [`DEFAULT_MACHINE_COUNT`] machines without destinations; enough for reservations, not for staging.
impl Default for StagingConfig {
    fn default() -> Self {
        StagingConfig::with_destinations(vec![None; DEFAULT_MACHINE_COUNT])
    }
}

impl TryFrom<StagingConfigDto> for StagingConfig {
    type Error = Error;

    fn try_from(dto: StagingConfigDto) -> Result<Self> {
        if dto.destinations.is_empty() {
            return Err(Error::ConfigError("at least one destination is required".to_string()));
        }
        if dto.max_concurrency == 0 {
            return Err(Error::ConfigError("maxConcurrency must be at least 1".to_string()));
        }
        if dto.chunk_size_bytes == 0 {
            return Err(Error::ConfigError("chunkSizeBytes must be at least 1".to_string()));
        }

        let destinations = dto
            .destinations
            .into_iter()
            .map(|d| d.map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty()).map(PathBuf::from))
            .collect();

        Ok(StagingConfig {
            registry: DestinationRegistry::new(destinations),
            cleanup_pattern: CleanupPattern::new(&dto.cleanup_pattern)?,
            max_concurrency: dto.max_concurrency,
            chunk_size: dto.chunk_size_bytes,
            store_path: PathBuf::from(dto.store_path),
            poll_interval: Duration::from_millis(dto.poll_interval_ms),
            log_dir: PathBuf::from(dto.log_dir),
        })
    }
}
