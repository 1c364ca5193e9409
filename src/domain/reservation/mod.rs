pub mod file_store;
pub mod memory_store;
pub mod reservation_state;
pub mod reservation_store;
pub mod reservation_sync;
pub mod snapshot;
