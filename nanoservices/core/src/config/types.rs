use serde::Deserialize;
use std::collections::HashMap;

use super::params::PluginParams;

#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    pub name: String,
    pub description: Option<String>,
    pub source: PluginConfig,
    pub destination: PluginConfig,
    /// Raw `model` fragment, validated by `Model::load`
    #[serde(default)]
    pub model: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PluginConfig {
    /// Registry name of the plugin
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// All other fields are passed to the plugin as params
    #[serde(flatten)]
    pub params: PluginParams,
}
