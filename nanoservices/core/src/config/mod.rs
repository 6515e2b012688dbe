pub mod loader;
pub mod params;
pub mod types;

pub use loader::{load_config, parse_config, ConfigError};
pub use params::{InitError, PluginParams};
pub use types::{BridgeConfig, PluginConfig};
