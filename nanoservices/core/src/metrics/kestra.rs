//! Metric lines in the `::{json}::` form that the Kestra orchestrator scrapes from stdout.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Timer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    metrics: [&'a Metric; 1],
}

impl Metric {
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self { name: name.into(), metric_type: MetricType::Counter, value, tags: BTreeMap::new() }
    }

    /// Timer value in seconds.
    pub fn timer(name: impl Into<String>, seconds: f64) -> Self {
        Self { name: name.into(), metric_type: MetricType::Timer, value: seconds, tags: BTreeMap::new() }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn render(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(&Envelope { metrics: [self] })?;
        Ok(format!("::{json}::"))
    }

    /// Print the metric line to stdout.
    pub fn emit(&self) {
        match self.render() {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!(metric = %self.name, error = %e, "failed to render metric"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_line_format() {
        let line = Metric::counter("total_success", 5.0).render().unwrap();
        assert_eq!(line, r#"::{"metrics":[{"name":"total_success","type":"counter","value":5.0}]}::"#);
    }

    #[test]
    fn tags_are_included_when_present() {
        let metric = Metric::counter("total_failed", 2.0).with_tag("bridge", "sales");
        let line = metric.render().unwrap();
        let inner = line.trim_start_matches("::").trim_end_matches("::");
        let parsed: serde_json::Value = serde_json::from_str(inner).unwrap();

        assert_eq!(parsed["metrics"][0]["tags"]["bridge"], "sales");
        assert_eq!(parsed["metrics"][0]["value"], 2.0);
    }

    #[test]
    fn timer_type() {
        let line = Metric::timer("duration", 1.5).render().unwrap();
        assert!(line.contains(r#""type":"timer""#));
    }
}
