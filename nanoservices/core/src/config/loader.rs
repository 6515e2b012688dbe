use std::path::Path;
use crate::config::types::BridgeConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Load a bridge config from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<BridgeConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse a bridge config from a YAML string.
pub fn parse_config(yaml: &str) -> Result<BridgeConfig, ConfigError> {
    let config: BridgeConfig = serde_yaml::from_str(yaml)?;
    Ok(config)
}
