use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client as ReqwestClient;
use serde_json::Value;

use databridge_utils::error::Error;
use databridge_utils::DatabridgeResult;

use super::{reject_policy, FetchError, FetchOptions, Source};
use crate::config::params::env_secret;
use crate::config::{InitError, PluginParams};
use crate::convert::{Converter, FetchedRecords, RecordRejection, RejectionCause};
use crate::model::{Model, RawRecord};

pub const NAME: &str = "sql_api";
pub const DEFAULT_TOKEN_ENV: &str = "API_TOKEN";
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Runs a SQL query through an HTTP query API and converts the `results` rows.
#[derive(Default)]
pub struct SqlApiSource {
    state: Option<Ready>,
}

struct Ready {
    client: ReqwestClient,
    endpoint: url::Url,
    token: String,
    query: String,
    converter: Converter,
}

impl SqlApiSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ready {
    fn render_query(&self, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> String {
        let model = self.converter.model();
        let stamp = |ts: DateTime<Utc>| {
            ts.with_timezone(&model.timezone())
                .format(model.datetime_format())
                .to_string()
        };
        self.query
            .replace("{start_at}", &stamp(start_at))
            .replace("{end_at}", &stamp(end_at))
    }
}

#[async_trait]
impl Source for SqlApiSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn init(&mut self, params: &PluginParams, model: Arc<Model>) -> Result<(), InitError> {
        let endpoint = params.required_str("endpoint")?;
        let endpoint = url::Url::parse(endpoint).map_err(|e| InitError::Client(e.into()))?;
        let query = params.required_str("query")?.to_string();
        let token_env = params.optional_str("token_env")?.unwrap_or(DEFAULT_TOKEN_ENV);
        let policy = reject_policy(params)?;
        let token = env_secret(token_env)?;

        self.state = Some(Ready {
            client: ReqwestClient::new(),
            endpoint,
            token,
            query,
            converter: Converter::new(model, policy),
        });
        Ok(())
    }

    async fn fetch(&self, options: &FetchOptions) -> Result<FetchedRecords, FetchError> {
        let ready = self.state.as_ref().ok_or(FetchError::NotInitialized)?;
        let start_at = options.start_at.ok_or(FetchError::MissingOption("start_at"))?;
        let end_at = options.end_at.ok_or(FetchError::MissingOption("end_at"))?;

        let query = ready.render_query(start_at, end_at);
        tracing::info!(%start_at, %end_at, endpoint = %ready.endpoint, "querying sql api");

        let resp = ready
            .client
            .post(ready.endpoint.clone())
            .header(API_KEY_HEADER, &ready.token)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(Error::from)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status { status: status.as_u16(), body });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::UnexpectedFormat(e.to_string()))?;
        let rows = match body {
            Value::Object(mut map) => match map.remove("results") {
                Some(Value::Array(rows)) => rows,
                _ => return Err(FetchError::UnexpectedFormat("missing `results` array".into())),
            },
            _ => return Err(FetchError::UnexpectedFormat("body is not an object".into())),
        };

        let mut out = FetchedRecords::default();
        for (index, row) in rows.into_iter().enumerate() {
            match raw_record(row) {
                Ok(raw) => match ready.converter.convert_record(index, &raw) {
                    Ok(record) => out.records.push(record),
                    Err(rejection) => out.rejected.push(rejection),
                },
                Err(found) => {
                    tracing::error!(record = index, %found, "result row is not an object");
                    out.rejected.push(RecordRejection {
                        index,
                        cause: RejectionCause::Unreadable(format!("expected an object, found {found}")),
                        raw: RawRecord::new(),
                    });
                }
            }
        }
        tracing::info!(fetched = out.fetched(), rejected = out.rejected.len(), "sql api fetch complete");
        Ok(out)
    }

    async fn close(&mut self) -> DatabridgeResult<()> {
        self.state = None;
        Ok(())
    }
}

/// Flatten one JSON row into column strings. `null` fields are left out.
fn raw_record(row: Value) -> Result<RawRecord, &'static str> {
    let Value::Object(fields) = row else {
        return Err(json_kind(&row));
    };
    Ok(fields
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, ColumnType, TypedValue};
    use chrono::TimeZone;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model() -> Arc<Model> {
        Arc::new(Model::new(
            vec![
                Column::new("time", ColumnType::DateTime),
                Column::new("id", ColumnType::BigInt),
                Column::new("amount", ColumnType::Float),
            ],
            vec!["time".into(), "id".into()],
        ))
    }

    fn ready(endpoint: &str, query: &str) -> SqlApiSource {
        SqlApiSource {
            state: Some(Ready {
                client: ReqwestClient::new(),
                endpoint: url::Url::parse(endpoint).unwrap(),
                token: "secret".into(),
                query: query.into(),
                converter: Converter::new(model(), Default::default()),
            }),
        }
    }

    fn window() -> FetchOptions {
        FetchOptions {
            start_at: Some(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()),
            end_at: Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()),
            file_path: None,
        }
    }

    #[test]
    fn placeholders_use_the_model_zone_and_format() {
        let source = ready("http://localhost/sql", "WHERE ts >= '{start_at}' AND ts < '{end_at}'");
        let opts = window();
        let query = source
            .state
            .as_ref()
            .unwrap()
            .render_query(opts.start_at.unwrap(), opts.end_at.unwrap());
        assert_eq!(query, "WHERE ts >= '15.01.2024 10:00:00' AND ts < '15.01.2024 11:00:00'");
    }

    #[test]
    fn json_rows_are_stringified() {
        let raw = raw_record(serde_json::json!({"id": 7, "flag": true, "name": "x", "gone": null})).unwrap();
        assert_eq!(raw["id"], "7");
        assert_eq!(raw["flag"], "true");
        assert_eq!(raw["name"], "x");
        assert!(!raw.contains_key("gone"));
        assert_eq!(raw_record(serde_json::json!([1])).unwrap_err(), "an array");
    }

    #[tokio::test]
    async fn fetch_posts_the_query_and_converts_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sql"))
            .and(header(API_KEY_HEADER, "secret"))
            .and(body_json(serde_json::json!({"query": "FROM 15.01.2024 10:00:00"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"time": "15.01.2024 10:00:00", "id": "1", "amount": "12,5"},
                    {"time": "15.01.2024 10:00:00", "id": "x", "amount": "1"},
                    "garbage"
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = ready(&format!("{}/sql", server.uri()), "FROM {start_at}");
        let fetched = source.fetch(&window()).await.unwrap();

        assert_eq!(fetched.fetched(), 3);
        assert_eq!(fetched.records.len(), 1);
        assert_eq!(fetched.records[0].get(1), Some(&TypedValue::Integer(1)));
        assert_eq!(fetched.records[0].get(2), Some(&TypedValue::Float(12.5)));
        assert_eq!(fetched.rejected.len(), 2);
        assert_eq!(fetched.rejected[0].column(), Some("id"));
        assert!(matches!(fetched.rejected[1].cause, RejectionCause::Unreadable(_)));
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let source = ready(&server.uri(), "q");
        let err = source.fetch(&window()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 401, ref body } if body == "bad key"));
    }

    #[tokio::test]
    async fn body_without_results_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"rows": []})))
            .mount(&server)
            .await;

        let source = ready(&server.uri(), "q");
        assert!(matches!(source.fetch(&window()).await, Err(FetchError::UnexpectedFormat(_))));
    }

    #[tokio::test]
    async fn both_window_bounds_are_required() {
        let source = ready("http://localhost/sql", "q");
        let opts = FetchOptions { end_at: None, ..window() };
        assert!(matches!(source.fetch(&opts).await, Err(FetchError::MissingOption("end_at"))));
    }

    #[tokio::test]
    async fn init_validates_params() {
        let mut source = SqlApiSource::new();
        let params = PluginParams::new().with("query", "q");
        assert!(matches!(source.init(&params, model()).await, Err(InitError::MissingParam(k)) if k == "endpoint"));

        let params = PluginParams::new()
            .with("endpoint", "http://localhost/sql")
            .with("query", "q")
            .with("token_env", "DATABRIDGE_TEST_UNSET_TOKEN");
        assert!(matches!(source.init(&params, model()).await, Err(InitError::MissingEnv(_))));

        let params = PluginParams::new()
            .with("endpoint", "http://localhost/sql")
            .with("query", "q")
            .with("on_conversion_error", "explode");
        assert!(matches!(source.init(&params, model()).await, Err(InitError::InvalidParam { .. })));
    }
}
