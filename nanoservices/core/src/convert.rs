//! String to typed-value conversion, applied to every field a source emits.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

use crate::model::{ColumnType, Model, RawRecord, TypedRecord, TypedValue};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("{value:?} is not an integer")]
    NotAnInteger { value: String },
    #[error("{value:?} is not a number")]
    NotANumber { value: String },
    #[error("{value:?} is not a timestamp: {reason}")]
    BadTimestamp { value: String, reason: String },
}

/// Convert one raw field into the semantic type of its column.
pub fn convert(raw: &str, column_type: ColumnType, model: &Model) -> Result<TypedValue, ConversionError> {
    match column_type {
        ColumnType::String => Ok(TypedValue::Text(raw.to_string())),
        ColumnType::BigInt => raw
            .parse::<i64>()
            .map(TypedValue::Integer)
            .map_err(|_| ConversionError::NotAnInteger { value: raw.to_string() }),
        // int columns are stored as 32-bit integers, so the range is checked here
        ColumnType::Int => raw
            .parse::<i32>()
            .map(|v| TypedValue::Integer(i64::from(v)))
            .map_err(|_| ConversionError::NotAnInteger { value: raw.to_string() }),
        ColumnType::Float => {
            let normalized = raw.replace(',', ".");
            match normalized.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(TypedValue::Float(v)),
                _ => Err(ConversionError::NotANumber { value: raw.to_string() }),
            }
        }
        ColumnType::DateTime => parse_timestamp(raw, model).map(TypedValue::Timestamp),
        ColumnType::DateTimeNullable if raw.is_empty() => Ok(TypedValue::Null),
        ColumnType::DateTimeNullable => parse_timestamp(raw, model).map(TypedValue::Timestamp),
    }
}

fn parse_timestamp(raw: &str, model: &Model) -> Result<DateTime<Tz>, ConversionError> {
    let bad = |reason: String| ConversionError::BadTimestamp { value: raw.to_string(), reason };

    let naive = NaiveDateTime::parse_from_str(raw, model.datetime_format()).map_err(|e| bad(e.to_string()))?;
    // chrono accepts unpadded fields and extra whitespace; the layout is exact.
    if naive.format(model.datetime_format()).to_string() != raw {
        return Err(bad(format!("does not match format {}", model.datetime_format())));
    }
    match model.timezone().from_local_datetime(&naive) {
        LocalResult::Single(ts) => Ok(ts),
        // Repeated wall-clock hour at the end of DST: take the first occurrence.
        LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        LocalResult::None => Err(bad(format!("local time does not exist in {}", model.timezone()))),
    }
}

/// What a source does with a record whose fields fail to convert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RejectPolicy {
    /// Exclude the whole record and report it as rejected.
    #[default]
    DropRecord,
    /// Keep the record with the failing fields set to null.
    NullField,
}

impl FromStr for RejectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_record" => Ok(RejectPolicy::DropRecord),
            "null_field" => Ok(RejectPolicy::NullField),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectionCause {
    Conversion { column: String, error: ConversionError },
    Unreadable(String),
}

impl fmt::Display for RejectionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionCause::Conversion { column, error } => write!(f, "column {column}: {error}"),
            RejectionCause::Unreadable(reason) => write!(f, "unreadable record: {reason}"),
        }
    }
}

/// A source record that never reached the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRejection {
    pub index: usize,
    pub cause: RejectionCause,
    pub raw: RawRecord,
}

impl RecordRejection {
    pub fn column(&self) -> Option<&str> {
        match &self.cause {
            RejectionCause::Conversion { column, .. } => Some(column),
            RejectionCause::Unreadable(_) => None,
        }
    }
}

/// Output of one fetch: converted records plus everything that was dropped.
#[derive(Debug, Default)]
pub struct FetchedRecords {
    pub records: Vec<TypedRecord>,
    pub rejected: Vec<RecordRejection>,
}

impl FetchedRecords {
    /// Number of records the source produced, converted or not.
    pub fn fetched(&self) -> usize {
        self.records.len() + self.rejected.len()
    }
}

/// Record-level conversion against a shared model.
#[derive(Debug, Clone)]
pub struct Converter {
    model: Arc<Model>,
    policy: RejectPolicy,
}

impl Converter {
    pub fn new(model: Arc<Model>, policy: RejectPolicy) -> Self {
        Self { model, policy }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn policy(&self) -> RejectPolicy {
        self.policy
    }

    /// Convert every model column of `raw`; keys outside the model are ignored.
    pub fn convert_record(&self, index: usize, raw: &RawRecord) -> Result<TypedRecord, RecordRejection> {
        let mut values = Vec::with_capacity(self.model.columns().len());
        let mut first_failure: Option<(String, ConversionError)> = None;

        for column in self.model.columns() {
            let Some(field) = raw.get(&column.name) else {
                tracing::warn!(record = index, column = %column.name, "column not found in record");
                values.push(TypedValue::Null);
                continue;
            };

            match convert(field, column.column_type, &self.model) {
                Ok(value) => values.push(value),
                Err(error) => match self.policy {
                    RejectPolicy::DropRecord => {
                        tracing::error!(record = index, column = %column.name, error = %error, "column failed to convert");
                        if first_failure.is_none() {
                            first_failure = Some((column.name.clone(), error));
                        }
                        values.push(TypedValue::Null);
                    }
                    RejectPolicy::NullField => {
                        tracing::warn!(record = index, column = %column.name, error = %error, "nulling field");
                        values.push(TypedValue::Null);
                    }
                },
            }
        }

        if let Some((column, error)) = first_failure {
            tracing::error!(record = index, column = %column, "dropping record");
            return Err(RecordRejection {
                index,
                cause: RejectionCause::Conversion { column, error },
                raw: raw.clone(),
            });
        }

        Ok(TypedRecord::new(index, values))
    }

    /// Convert a whole source output, numbering records from zero.
    pub fn convert_all<I>(&self, raws: I) -> FetchedRecords
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut out = FetchedRecords::default();
        for (index, raw) in raws.into_iter().enumerate() {
            match self.convert_record(index, &raw) {
                Ok(record) => out.records.push(record),
                Err(rejection) => out.rejected.push(rejection),
            }
        }
        out
    }
}
