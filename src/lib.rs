use std::sync::Arc;

use crate::domain::reservation::file_store::FileReservationStore;
use crate::domain::reservation::reservation_sync::ReservationSync;
use crate::domain::staging_config::StagingConfig;
use crate::error::Result;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Connects to the shared reservation file named in `config`, bootstrapping it if needed.
pub fn connect_reservations(config: &StagingConfig) -> Result<Arc<ReservationSync>> {
    let store = Arc::new(FileReservationStore::new(&config.store_path, config.poll_interval));
    log::info!("Using reservation store at '{}'.", config.store_path.display());

    let sync = ReservationSync::connect(store, config.machine_count())?;
    log::info!("Reservation state synchronized for {} machines.", sync.machine_count());

    Ok(sync)
}
