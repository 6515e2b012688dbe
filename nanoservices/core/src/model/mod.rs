//! The typed schema model shared by every source and destination in a run.
//!
//! A [`Model`] is loaded once from the `model` section of the configuration
//! and is read-only afterwards; callers share it behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use serde_yaml::Value;

pub mod value;

pub use value::{RawRecord, TypedRecord, TypedValue};

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Berlin;
pub const DEFAULT_DATETIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SchemaError {
    #[error("model has no `columns` sequence")]
    MissingColumns,
    #[error("column #{position} is not a mapping")]
    InvalidColumn { position: usize },
    #[error("column #{position} has no string `name`")]
    InvalidColumnName { position: usize },
    #[error("column #{position} has invalid type {found:?}")]
    InvalidColumnType { position: usize, found: String },
    #[error("model has no `unique_key` sequence of strings")]
    MissingUniqueKey,
    #[error("unique key {0:?} is not a model column")]
    UnknownUniqueKey(String),
    #[error("unknown timezone {0:?}")]
    InvalidTimezone(String),
    #[error("invalid datetime format {0:?}")]
    InvalidDatetimeFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    String,
    BigInt,
    Float,
    Int,
    DateTime,
    DateTimeNullable,
}

impl ColumnType {
    pub const ALL: [ColumnType; 6] = [
        ColumnType::String,
        ColumnType::BigInt,
        ColumnType::Float,
        ColumnType::Int,
        ColumnType::DateTime,
        ColumnType::DateTimeNullable,
    ];

    /// Canonical configuration spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "float",
            ColumnType::Int => "int",
            ColumnType::DateTime => "datetime",
            ColumnType::DateTimeNullable => "datetime_nullable",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColumnType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self { name: name.into(), column_type }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    columns: Vec<Column>,
    unique_keys: Vec<String>,
    timezone: Tz,
    datetime_format: String,
}

impl Model {
    pub fn new(columns: Vec<Column>, unique_keys: Vec<String>) -> Self {
        Self {
            columns,
            unique_keys,
            timezone: DEFAULT_TIMEZONE,
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_datetime_format(mut self, format: impl Into<String>) -> Self {
        self.datetime_format = format.into();
        self
    }

    /// Build a model from the raw `model` configuration fragment.
    pub fn load(raw: &HashMap<String, Value>) -> Result<Self, SchemaError> {
        let entries = raw
            .get("columns")
            .and_then(Value::as_sequence)
            .ok_or(SchemaError::MissingColumns)?;

        let mut columns = Vec::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if !entry.is_mapping() {
                return Err(SchemaError::InvalidColumn { position });
            }
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or(SchemaError::InvalidColumnName { position })?;
            let type_name = entry.get("type").and_then(Value::as_str).ok_or_else(|| {
                SchemaError::InvalidColumnType { position, found: format!("{:?}", entry.get("type")) }
            })?;
            let column_type = type_name
                .parse::<ColumnType>()
                .map_err(|found| SchemaError::InvalidColumnType { position, found })?;
            columns.push(Column::new(name, column_type));
        }

        let unique_keys = raw
            .get("unique_key")
            .and_then(Value::as_sequence)
            .ok_or(SchemaError::MissingUniqueKey)?
            .iter()
            .map(|key| key.as_str().map(str::to_string).ok_or(SchemaError::MissingUniqueKey))
            .collect::<Result<Vec<_>, _>>()?;

        // A column-less model is accepted as-is; key membership only means
        // something once there are columns to check against.
        if !columns.is_empty() {
            if let Some(unknown) = unique_keys.iter().find(|k| !columns.iter().any(|c| &c.name == *k)) {
                return Err(SchemaError::UnknownUniqueKey(unknown.clone()));
            }
        }

        let mut model = Model::new(columns, unique_keys);

        if let Some(zone) = raw.get("timezone").and_then(Value::as_str) {
            model.timezone = zone
                .parse::<Tz>()
                .map_err(|_| SchemaError::InvalidTimezone(zone.to_string()))?;
        }
        if let Some(format) = raw.get("datetime_format").and_then(Value::as_str) {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(SchemaError::InvalidDatetimeFormat(format.to_string()));
            }
            model.datetime_format = format.to_string();
        }

        Ok(model)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn unique_keys(&self) -> &[String] {
        &self.unique_keys
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn is_key(&self, column: &str) -> bool {
        self.unique_keys.iter().any(|k| k == column)
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn datetime_format(&self) -> &str {
        &self.datetime_format
    }
}
