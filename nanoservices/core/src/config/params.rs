use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::Deserialize;
use serde_yaml::Value;

use crate::statement::StatementError;

/// Failure to bring a source or destination into a usable state.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("missing parameter `{0}`")]
    MissingParam(String),
    #[error("parameter `{key}` must be {expected}")]
    InvalidParam { key: String, expected: &'static str },
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error(transparent)]
    Statement(#[from] StatementError),
    #[error(transparent)]
    Client(#[from] databridge_utils::error::Error),
}

/// Plugin-specific keys of a `source` or `destination` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct PluginParams(HashMap<String, Value>);

impl PluginParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn required_str(&self, key: &str) -> Result<&str, InitError> {
        self.optional_str(key)?.ok_or_else(|| InitError::MissingParam(key.to_string()))
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<&str>, InitError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_str().map(Some).ok_or_else(|| invalid(key, "a string")),
        }
    }

    pub fn optional_bool(&self, key: &str) -> Result<Option<bool>, InitError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_bool().map(Some).ok_or_else(|| invalid(key, "a boolean")),
        }
    }

    pub fn optional_positive(&self, key: &str) -> Result<Option<NonZeroUsize>, InitError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .and_then(NonZeroUsize::new)
                .map(Some)
                .ok_or_else(|| invalid(key, "a positive integer")),
        }
    }

    /// String parameter parsed through `FromStr`.
    pub fn optional_parsed<T: FromStr>(&self, key: &str, expected: &'static str) -> Result<Option<T>, InitError> {
        self.optional_str(key)?
            .map(|s| s.parse::<T>().map_err(|_| invalid(key, expected)))
            .transpose()
    }
}

fn invalid(key: &str, expected: &'static str) -> InitError {
    InitError::InvalidParam { key: key.to_string(), expected }
}

/// Read a secret from the environment as part of plugin initialization.
pub fn env_secret(name: &str) -> Result<String, InitError> {
    databridge_utils::required_env(name).map_err(|_| InitError::MissingEnv(name.to_string()))
}
