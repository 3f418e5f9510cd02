pub mod config;
pub mod logger;
pub mod store_toml;

pub use config::*;
pub use logger::{Colors, setup_logging};
pub use store_toml::load_store_settings;
