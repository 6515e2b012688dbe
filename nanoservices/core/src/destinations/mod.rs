use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use databridge_utils::DatabridgeResult;

use crate::config::{InitError, PluginParams};
use crate::model::{Model, TypedRecord};
use crate::statement::StatementError;

pub mod batch;
pub mod timescaledb;

pub use batch::{BatchError, BatchSink, BatchWriter};

/// A sink that persists typed records.
///
/// Lifecycle: `init` once with the plugin params and the validated model,
/// `ensure_schema` before the first `store`, then `close`.
#[async_trait]
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    async fn init(&mut self, params: &PluginParams, model: Arc<Model>) -> Result<(), InitError>;

    /// Create the target table (and hypertable) when missing. Idempotent.
    async fn ensure_schema(&self) -> Result<(), FatalError>;

    async fn store(&self, records: &[TypedRecord]) -> Result<WriteOutcome, StoreAborted>;

    async fn close(&mut self) -> DatabridgeResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    Begin,
    Prepare,
    Commit,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxStage::Begin => "begin",
            TxStage::Prepare => "prepare",
            TxStage::Commit => "commit",
        })
    }
}

/// A failure that makes further writes pointless.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FatalError {
    #[error("destination used before init")]
    NotInitialized,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("transaction {stage} failed: {message}")]
    Transaction { stage: TxStage, message: String },
    #[error(transparent)]
    Statement(#[from] StatementError),
    #[error("schema setup failed: {0}")]
    Schema(String),
}

/// A batch that was rolled back. `records` holds the input indexes of its members.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedBatch {
    pub batch: usize,
    pub records: Vec<usize>,
    pub reason: String,
}

/// Per-record accounting of one `store` call. `success + failed` equals
/// the number of records handed in when the call completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    pub success: usize,
    pub failed: usize,
    pub failed_batches: Vec<FailedBatch>,
}

impl WriteOutcome {
    pub fn total(&self) -> usize {
        self.success + self.failed
    }

    pub(crate) fn record_success(&mut self, count: usize) {
        self.success += count;
    }

    pub(crate) fn record_failure(&mut self, batch: FailedBatch) {
        self.failed += batch.records.len();
        self.failed_batches.push(batch);
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} written, {} failed in {} batch(es)",
            self.success,
            self.failed,
            self.failed_batches.len()
        )
    }
}

/// `store` stopped early. `partial` counts only batches that finished before the abort.
#[derive(Debug, thiserror::Error)]
#[error("store aborted after {partial}: {source}")]
pub struct StoreAborted {
    pub partial: WriteOutcome,
    #[source]
    pub source: FatalError,
}
