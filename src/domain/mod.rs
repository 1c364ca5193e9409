pub mod distribution;
pub mod machine;
pub mod planning;
pub mod reservation;
pub mod staging;
pub mod staging_config;
