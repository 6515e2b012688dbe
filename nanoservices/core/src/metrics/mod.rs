use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

pub mod kestra;

// Global registry and metrics are initialized lazily.
static REGISTRY: Lazy<Registry> =
    Lazy::new(|| Registry::new_custom(Some("databridge".to_string()), None).unwrap_or_default());

/// Registers a collector, logging instead of panicking when the definition is rejected.
fn registered<C>(name: &str, built: prometheus::Result<C>) -> Option<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector = match built {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(metric = name, error = %e, "metric disabled");
            return None;
        }
    };
    if let Err(e) = REGISTRY.register(Box::new(collector.clone())) {
        tracing::warn!(metric = name, error = %e, "metric not registered");
    }
    Some(collector)
}

fn counter_vec(name: &str, help: &str, label: &str) -> Option<IntCounterVec> {
    registered(name, IntCounterVec::new(Opts::new(name, help), &[label]))
}

static RECORDS_WRITTEN: Lazy<Option<IntCounterVec>> =
    Lazy::new(|| counter_vec("records_written_total", "Records committed to the destination", "bridge"));

static RECORDS_FAILED: Lazy<Option<IntCounterVec>> =
    Lazy::new(|| counter_vec("records_failed_total", "Records in rolled-back batches", "bridge"));

static RECORDS_REJECTED: Lazy<Option<IntCounterVec>> =
    Lazy::new(|| counter_vec("records_rejected_total", "Records dropped during conversion", "bridge"));

static BATCHES: Lazy<Option<IntCounterVec>> =
    Lazy::new(|| counter_vec("batches_total", "Batch transactions by outcome", "outcome"));

static BATCH_DURATION: Lazy<Option<Histogram>> = Lazy::new(|| {
    let opts = HistogramOpts::new("batch_duration_seconds", "Time spent per batch transaction");
    registered("batch_duration_seconds", Histogram::with_opts(opts))
});

fn inc_by(counter: &Lazy<Option<IntCounterVec>>, label: &str, n: usize) {
    if let Some(c) = counter.as_ref() {
        c.with_label_values(&[label]).inc_by(n as u64);
    }
}

/// Add the final counts of one run.
pub fn record_run(bridge: &str, written: usize, failed: usize, rejected: usize) {
    inc_by(&RECORDS_WRITTEN, bridge, written);
    inc_by(&RECORDS_FAILED, bridge, failed);
    inc_by(&RECORDS_REJECTED, bridge, rejected);
}

/// Count one batch by outcome (`committed`, `rolled_back` or `aborted`).
pub fn inc_batch(outcome: &str) {
    inc_by(&BATCHES, outcome, 1);
}

pub fn observe_batch_duration(seconds: f64) {
    if let Some(h) = BATCH_DURATION.as_ref() {
        h.observe(seconds);
    }
}

/// Gather metrics as text in Prometheus exposition format.
pub fn gather_text() -> String {
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Write the current exposition text to a file.
pub fn write_to(path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
    std::fs::write(path, gather_text())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_counts_are_exposed() {
        record_run("metrics_test", 3, 1, 2);
        inc_batch("committed");
        observe_batch_duration(0.01);

        let txt = gather_text();
        assert!(txt.contains("databridge_records_written_total{bridge=\"metrics_test\"} 3"));
        assert!(txt.contains("databridge_records_rejected_total{bridge=\"metrics_test\"} 2"));
        assert!(txt.contains("databridge_batches_total"));
        assert!(txt.contains("databridge_batch_duration_seconds"));
    }

    #[test]
    fn invalid_definition_is_disabled_not_fatal() {
        let bad = IntCounterVec::new(Opts::new("bad name with spaces", "help"), &["bridge"]);
        assert!(registered("bad name with spaces", bad).is_none());
        assert!(RECORDS_FAILED.is_some());
        assert!(BATCHES.is_some());
        assert!(BATCH_DURATION.is_some());
    }

    #[test]
    fn exposition_can_be_written_to_disk() {
        record_run("metrics_file_test", 1, 0, 0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");
        write_to(&path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("metrics_file_test"));
    }
}
