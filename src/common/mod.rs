pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use config::{Config, ProbeSource};
pub use dev_mode::DevMode;
pub use error::{KioskError, Result};
pub use paths::{system_data_dir, system_config_file, system_models_dir};
