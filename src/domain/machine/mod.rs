pub mod destination_registry;
pub mod machine_id;
