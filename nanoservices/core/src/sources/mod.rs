use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use databridge_utils::DatabridgeResult;

use crate::config::{InitError, PluginParams};
use crate::convert::{FetchedRecords, RejectPolicy};
use crate::model::Model;

pub mod csv;
pub mod sql_api;

/// Parameter naming the per-source reject policy.
pub const REJECT_POLICY_PARAM: &str = "on_conversion_error";

/// A data source that fetches raw records and converts them against the model.
#[async_trait]
pub trait Source: Send + Sync {
    /// Human-readable name for logging and metrics
    fn name(&self) -> &str;

    async fn init(&mut self, params: &PluginParams, model: Arc<Model>) -> Result<(), InitError>;

    async fn fetch(&self, options: &FetchOptions) -> Result<FetchedRecords, FetchError>;

    async fn close(&mut self) -> DatabridgeResult<()>;
}

/// Per-run inputs handed to `Source::fetch`.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source used before init")]
    NotInitialized,
    #[error("fetch option `{0}` is missing")]
    MissingOption(&'static str),
    #[error("source responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response format: {0}")]
    UnexpectedFormat(String),
    #[error(transparent)]
    Transport(#[from] databridge_utils::error::Error),
}

pub(crate) fn reject_policy(params: &PluginParams) -> Result<RejectPolicy, InitError> {
    Ok(params
        .optional_parsed(REJECT_POLICY_PARAM, "`drop_record` or `null_field`")?
        .unwrap_or_default())
}

pub fn register(registry: &mut crate::registry::Registry) {
    registry.register_source(sql_api::NAME, || Box::new(sql_api::SqlApiSource::new()));
    registry.register_source(csv::NAME, || Box::new(csv::CsvSource::new()));
}
