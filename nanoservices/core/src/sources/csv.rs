use std::sync::Arc;

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord};

use databridge_utils::error::Error;
use databridge_utils::DatabridgeResult;

use super::{reject_policy, FetchError, FetchOptions, Source};
use crate::config::{InitError, PluginParams};
use crate::convert::{Converter, FetchedRecords, RecordRejection, RejectionCause};
use crate::model::{Model, RawRecord};

pub const NAME: &str = "csv";

/// Reads a headed CSV file named by the `file_path` fetch option.
pub struct CsvSource {
    delimiter: u8,
    converter: Option<Converter>,
}

impl Default for CsvSource {
    fn default() -> Self {
        Self { delimiter: b',', converter: None }
    }
}

impl CsvSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Source for CsvSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn init(&mut self, params: &PluginParams, model: Arc<Model>) -> Result<(), InitError> {
        if let Some(delimiter) = params.optional_str("delimiter")? {
            self.delimiter = match delimiter.as_bytes() {
                [byte] => *byte,
                _ => {
                    return Err(InitError::InvalidParam {
                        key: "delimiter".into(),
                        expected: "a single-byte character",
                    })
                }
            };
        }
        self.converter = Some(Converter::new(model, reject_policy(params)?));
        Ok(())
    }

    async fn fetch(&self, options: &FetchOptions) -> Result<FetchedRecords, FetchError> {
        let converter = self.converter.as_ref().ok_or(FetchError::NotInitialized)?;
        let path = options.file_path.as_ref().ok_or(FetchError::MissingOption("file_path"))?;

        let content = tokio::fs::read(path).await.map_err(Error::from)?;
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(content.as_slice());
        let header = reader.headers().map_err(Error::from)?.clone();

        let mut out = FetchedRecords::default();
        for (index, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    tracing::error!(record = index, error = %e, "error reading csv row");
                    out.rejected.push(RecordRejection {
                        index,
                        cause: RejectionCause::Unreadable(e.to_string()),
                        raw: RawRecord::new(),
                    });
                    continue;
                }
            };
            match converter.convert_record(index, &to_raw(&header, &row)) {
                Ok(record) => out.records.push(record),
                Err(rejection) => out.rejected.push(rejection),
            }
        }
        tracing::info!(path = %path.display(), fetched = out.fetched(), rejected = out.rejected.len(), "csv read complete");
        Ok(out)
    }

    async fn close(&mut self) -> DatabridgeResult<()> {
        self.converter = None;
        Ok(())
    }
}

/// Pair fields with header names. Fields past the header are ignored.
fn to_raw(header: &StringRecord, row: &StringRecord) -> RawRecord {
    header
        .iter()
        .zip(row.iter())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
