//! TimescaleDB destination: pooled connections, one transaction per batch,
//! parameterized upserts.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls};

use databridge_utils::DatabridgeResult;

use super::batch::{BatchError, BatchSink, BatchWriter, DEFAULT_BATCH_SIZE};
use super::{Destination, FatalError, StoreAborted, TxStage, WriteOutcome};
use crate::config::params::env_secret;
use crate::config::{InitError, PluginParams};
use crate::model::{ColumnType, Model, TypedRecord, TypedValue};
use crate::statement;

pub const NAME: &str = "timescaledb";
pub const DEFAULT_CONN_ENV: &str = "TIMESCALEDB_CONN_STR";

type Param = Box<dyn ToSql + Sync + Send>;

/// A typed value that does not fit the storage type of its column.
#[derive(Debug, thiserror::Error)]
#[error("record {record}: column {column} ({column_type}) cannot hold a {found} value")]
pub struct BindError {
    record: usize,
    column: String,
    column_type: ColumnType,
    found: &'static str,
}

#[derive(Default)]
pub struct TimescaleDestination {
    state: Option<Ready>,
}

struct Ready {
    sink: PgBatchSink,
    writer: BatchWriter,
    table: String,
    hypertable: bool,
}

impl TimescaleDestination {
    pub fn new() -> Self {
        Self::default()
    }

    fn ready(&self) -> Result<&Ready, FatalError> {
        self.state.as_ref().ok_or(FatalError::NotInitialized)
    }
}

#[async_trait]
impl Destination for TimescaleDestination {
    fn name(&self) -> &str {
        NAME
    }

    async fn init(&mut self, params: &PluginParams, model: Arc<Model>) -> Result<(), InitError> {
        let table = params.required_str("table")?.to_string();
        let batch_size = params
            .optional_positive("batch_size")?
            .unwrap_or(NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN));
        let workers = params.optional_positive("workers")?.unwrap_or(NonZeroUsize::MIN);
        let hypertable = params.optional_bool("hypertable")?.unwrap_or(true);
        let conn_env = params.optional_str("conn_env")?.unwrap_or(DEFAULT_CONN_ENV);

        let upsert = statement::upsert_statement(&model, &table)?;
        let conn = env_secret(conn_env)?;
        let sink = PgBatchSink::connect(&conn, model, upsert, workers)?;

        tracing::info!(table = %table, batch_size = batch_size.get(), workers = workers.get(), "timescaledb destination ready");
        self.state = Some(Ready {
            sink,
            writer: BatchWriter::new(batch_size, workers),
            table,
            hypertable,
        });
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), FatalError> {
        let ready = self.ready()?;
        let client = ready.sink.client().await?;
        for sql in statement::schema_statements(&ready.sink.model, &ready.table, ready.hypertable) {
            tracing::debug!(sql = %sql, "applying schema statement");
            client
                .batch_execute(&sql)
                .await
                .map_err(|e| FatalError::Schema(format!("{}: {e}", ready.table)))?;
        }
        Ok(())
    }

    async fn store(&self, records: &[TypedRecord]) -> Result<WriteOutcome, StoreAborted> {
        let ready = self
            .ready()
            .map_err(|source| StoreAborted { partial: WriteOutcome::default(), source })?;
        ready.writer.write(&ready.sink, records).await
    }

    async fn close(&mut self) -> DatabridgeResult<()> {
        if let Some(ready) = self.state.take() {
            ready.sink.pool.close();
        }
        Ok(())
    }
}

struct PgBatchSink {
    pool: Pool,
    model: Arc<Model>,
    upsert: String,
}

impl PgBatchSink {
    /// Builds the pool lazily; no connection is opened until the first batch.
    fn connect(conn: &str, model: Arc<Model>, upsert: String, workers: NonZeroUsize) -> Result<Self, InitError> {
        let pg_config: PgConfig = conn
            .parse()
            .map_err(|e: tokio_postgres::Error| InitError::Client(e.into()))?;
        let mgr = Manager::from_config(pg_config, NoTls, ManagerConfig { recycling_method: RecyclingMethod::Fast });
        let pool = Pool::builder(mgr)
            .max_size(workers.get())
            .build()
            .map_err(|e| InitError::Client(e.into()))?;
        Ok(Self { pool, model, upsert })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, FatalError> {
        self.pool.get().await.map_err(|e| FatalError::Connection(e.to_string()))
    }
}

#[async_trait]
impl BatchSink for PgBatchSink {
    async fn write_batch(&self, batch: &[TypedRecord]) -> Result<(), BatchError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(|e| tx_error(TxStage::Begin, e))?;
        let stmt = tx.prepare(&self.upsert).await.map_err(|e| tx_error(TxStage::Prepare, e))?;

        for record in batch {
            let params = match bind_record(&self.model, record) {
                Ok(params) => params,
                Err(e) => {
                    if let Err(rb) = tx.rollback().await {
                        tracing::warn!(record = record.index(), error = %rb, "rollback failed");
                    }
                    return Err(BatchError::Rejected { reason: e.to_string() });
                }
            };
            let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();

            if let Err(e) = tx.execute(&stmt, &refs).await {
                if e.is_closed() {
                    return Err(FatalError::Connection(e.to_string()).into());
                }
                let reason = format!("record {}: {e}", record.index());
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(record = record.index(), error = %rb, "rollback failed");
                }
                return Err(BatchError::Rejected { reason });
            }
        }

        tx.commit().await.map_err(|e| tx_error(TxStage::Commit, e))?;
        Ok(())
    }
}

fn tx_error(stage: TxStage, e: tokio_postgres::Error) -> BatchError {
    FatalError::Transaction { stage, message: e.to_string() }.into()
}

/// Statement parameters for one record, in model column order.
fn bind_record(model: &Model, record: &TypedRecord) -> Result<Vec<Param>, BindError> {
    model
        .columns()
        .iter()
        .enumerate()
        .map(|(pos, column)| {
            let value = record.get(pos).unwrap_or(&TypedValue::Null);
            bind_value(value, column.column_type).ok_or_else(|| BindError {
                record: record.index(),
                column: column.name.clone(),
                column_type: column.column_type,
                found: value.kind(),
            })
        })
        .collect()
}

fn bind_value(value: &TypedValue, column_type: ColumnType) -> Option<Param> {
    let param: Param = match (column_type, value) {
        (ColumnType::String, TypedValue::Null) => Box::new(None::<String>),
        // Empty strings are stored as NULL.
        (ColumnType::String, TypedValue::Text(s)) if s.is_empty() => Box::new(None::<String>),
        (ColumnType::String, TypedValue::Text(s)) => Box::new(Some(s.clone())),
        (ColumnType::BigInt, TypedValue::Null) => Box::new(None::<i64>),
        (ColumnType::BigInt, TypedValue::Integer(v)) => Box::new(Some(*v)),
        (ColumnType::Int, TypedValue::Null) => Box::new(None::<i32>),
        (ColumnType::Int, TypedValue::Integer(v)) => Box::new(Some(i32::try_from(*v).ok()?)),
        (ColumnType::Float, TypedValue::Null) => Box::new(None::<Decimal>),
        (ColumnType::Float, TypedValue::Float(v)) => Box::new(Some(Decimal::try_from(*v).ok()?)),
        (ColumnType::DateTime | ColumnType::DateTimeNullable, TypedValue::Null) => {
            Box::new(None::<chrono::DateTime<Utc>>)
        }
        (ColumnType::DateTime | ColumnType::DateTimeNullable, TypedValue::Timestamp(ts)) => {
            Box::new(Some(ts.with_timezone(&Utc)))
        }
        _ => return None,
    };
    Some(param)
}

pub fn register(registry: &mut crate::registry::Registry) {
    registry.register_destination(NAME, || Box::new(TimescaleDestination::new()));
}
