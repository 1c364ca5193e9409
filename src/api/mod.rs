pub mod staging_config_dto;
