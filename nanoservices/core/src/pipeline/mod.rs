use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::{BridgeConfig, InitError, PluginParams};
use crate::destinations::{Destination, FatalError, WriteOutcome};
use crate::metrics;
use crate::model::{Model, SchemaError};
use crate::registry::{Registry, RegistryError};
use crate::sources::{FetchError, FetchOptions, Source};
use crate::store::{Ledger, RunCounts, RunStatus};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid model: {0}")]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{plugin} init failed: {source}")]
    Init { plugin: String, source: InitError },
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("destination setup failed: {0}")]
    Setup(#[source] FatalError),
    #[error("run aborted ({summary}): {source}")]
    Aborted { summary: RunSummary, source: FatalError },
}

/// Counters of one run. `fetched = rejected + written + failed` for a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub name: String,
    pub fetched: usize,
    pub rejected: usize,
    pub written: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// True when every fetched record was written.
    pub fn is_clean(&self) -> bool {
        self.rejected == 0 && self.failed == 0
    }

    fn counts(&self) -> RunCounts {
        RunCounts { fetched: self.fetched, rejected: self.rejected, written: self.written, failed: self.failed }
    }

    fn status(&self) -> RunStatus {
        if self.is_clean() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} fetched, {} rejected, {} written, {} failed in {:.2}s",
            self.name,
            self.fetched,
            self.rejected,
            self.written,
            self.failed,
            self.elapsed.as_secs_f64()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub fetch: FetchOptions,
    /// Create the destination table before storing.
    pub run_schema: bool,
}

/// One source wired to one destination through a shared model.
pub struct Pipeline {
    name: String,
    model: Arc<Model>,
    source: Box<dyn Source>,
    source_params: PluginParams,
    destination: Box<dyn Destination>,
    destination_params: PluginParams,
}

impl Pipeline {
    /// Validate the model and resolve both plugins. No I/O happens here.
    pub fn new(registry: &Registry, config: BridgeConfig) -> Result<Self, RunError> {
        let model = Arc::new(Model::load(&config.model)?);
        let source = registry.source(&config.source.plugin_type)?;
        let destination = registry.destination(&config.destination.plugin_type)?;

        Ok(Self {
            name: config.name,
            model,
            source,
            source_params: config.source.params,
            destination,
            destination_params: config.destination.params,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Init, optional schema setup, fetch, store, close.
    pub async fn run(&mut self, options: &RunOptions, ledger: Option<&mut Ledger>) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let mut summary = RunSummary { name: self.name.clone(), ..Default::default() };

        if self.model.is_empty() {
            tracing::warn!(bridge = %self.name, "model has no columns, nothing to transfer");
            return Ok(summary);
        }

        let mut ledger = ledger;
        let run_id = ledger.as_deref().and_then(|l| {
            l.start_run(&self.name, &Utc::now().to_rfc3339())
                .map_err(|e| tracing::warn!(error = %e, "ledger unavailable"))
                .ok()
        });

        let result = self.execute(options, &mut summary, ledger.as_deref_mut(), run_id.as_deref()).await;
        summary.elapsed = started.elapsed();

        if let Err(e) = self.source.close().await {
            tracing::warn!(plugin = self.source.name(), error = %e, "source close failed");
        }
        if let Err(e) = self.destination.close().await {
            tracing::warn!(plugin = self.destination.name(), error = %e, "destination close failed");
        }

        metrics::record_run(&self.name, summary.written, summary.failed, summary.rejected);

        let (status, error) = match &result {
            Ok(()) => (summary.status(), None),
            Err(e) => (RunStatus::Aborted, Some(e.to_string())),
        };
        if let (Some(ledger), Some(id)) = (ledger.as_deref(), run_id.as_deref()) {
            let finished = Utc::now().to_rfc3339();
            if let Err(e) = ledger.complete_run(id, status, &finished, summary.counts(), error.as_deref()) {
                tracing::warn!(error = %e, "failed to complete ledger run");
            }
        }

        match result {
            Ok(()) => {
                tracing::info!(%summary, "run complete");
                Ok(summary)
            }
            Err(RunError::Aborted { source, .. }) => {
                tracing::error!(%summary, error = %source, "run aborted");
                Err(RunError::Aborted { summary, source })
            }
            Err(e) => Err(e),
        }
    }

    async fn execute(
        &mut self,
        options: &RunOptions,
        summary: &mut RunSummary,
        mut ledger: Option<&mut Ledger>,
        run_id: Option<&str>,
    ) -> Result<(), RunError> {
        let source_name = self.source.name().to_string();
        self.source
            .init(&self.source_params, Arc::clone(&self.model))
            .await
            .map_err(|source| RunError::Init { plugin: source_name, source })?;
        let destination_name = self.destination.name().to_string();
        self.destination
            .init(&self.destination_params, Arc::clone(&self.model))
            .await
            .map_err(|source| RunError::Init { plugin: destination_name, source })?;

        if options.run_schema {
            self.destination.ensure_schema().await.map_err(RunError::Setup)?;
        }

        let fetched = self.source.fetch(&options.fetch).await?;
        summary.fetched = fetched.fetched();
        summary.rejected = fetched.rejected.len();
        tracing::info!(bridge = %self.name, fetched = summary.fetched, rejected = summary.rejected, "fetch complete");

        if let (Some(ledger), Some(id)) = (ledger.as_deref_mut(), run_id) {
            if let Err(e) = ledger.record_rejections(id, &fetched.rejected) {
                tracing::warn!(error = %e, "failed to record rejections");
            }
        }

        let outcome = match self.destination.store(&fetched.records).await {
            Ok(outcome) => outcome,
            Err(aborted) => {
                apply(summary, &aborted.partial, ledger, run_id);
                return Err(RunError::Aborted { summary: summary.clone(), source: aborted.source });
            }
        };
        apply(summary, &outcome, ledger, run_id);
        Ok(())
    }
}

fn apply(summary: &mut RunSummary, outcome: &WriteOutcome, ledger: Option<&mut Ledger>, run_id: Option<&str>) {
    summary.written = outcome.success;
    summary.failed = outcome.failed;
    for batch in &outcome.failed_batches {
        tracing::error!(batch = batch.batch, records = ?batch.records, reason = %batch.reason, "batch not written");
    }
    if let (Some(ledger), Some(id)) = (ledger, run_id) {
        if let Err(e) = ledger.record_failed_batches(id, &outcome.failed_batches) {
            tracing::warn!(error = %e, "failed to record failed batches");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn unknown_plugins_fail_before_any_io() {
        let config = parse_config(
            "name: t\nsource: { type: ftp }\ndestination: { type: timescaledb }\n\
             model: { columns: [{name: id, type: bigint}], unique_key: [id] }\n",
        )
        .unwrap();
        let err = Pipeline::new(&Registry::builtin(), config).err().unwrap();
        assert!(matches!(err, RunError::Registry(_)));
    }

    #[test]
    fn invalid_model_is_a_schema_error() {
        let config = parse_config(
            "name: t\nsource: { type: csv }\ndestination: { type: timescaledb }\n\
             model: { columns: [{name: id, type: decimal}], unique_key: [id] }\n",
        )
        .unwrap();
        let err = Pipeline::new(&Registry::builtin(), config).err().unwrap();
        assert!(matches!(err, RunError::Schema(SchemaError::InvalidColumnType { .. })));
    }

    #[tokio::test]
    async fn empty_model_is_a_no_op_run() {
        let config = parse_config(
            "name: empty\nsource: { type: csv }\ndestination: { type: timescaledb }\n\
             model: { columns: [], unique_key: [] }\n",
        )
        .unwrap();
        let mut pipeline = Pipeline::new(&Registry::builtin(), config).unwrap();
        let summary = pipeline.run(&RunOptions::default(), None).await.unwrap();
        assert_eq!(summary.fetched, 0);
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn destination_init_errors_name_the_plugin() {
        let config = parse_config(
            "name: t\nsource: { type: csv }\ndestination: { type: timescaledb }\n\
             model: { columns: [{name: id, type: bigint}], unique_key: [id] }\n",
        )
        .unwrap();
        let mut pipeline = Pipeline::new(&Registry::builtin(), config).unwrap();
        let err = pipeline.run(&RunOptions::default(), None).await.unwrap_err();
        assert_eq!(err.to_string(), "timescaledb init failed: missing parameter `table`");
    }

    #[test]
    fn summary_display() {
        let summary = RunSummary { name: "sales".into(), fetched: 5, rejected: 1, written: 3, failed: 1, elapsed: Duration::from_millis(1500) };
        assert_eq!(summary.to_string(), "sales: 5 fetched, 1 rejected, 3 written, 1 failed in 1.50s");
        assert!(!summary.is_clean());
    }
}
