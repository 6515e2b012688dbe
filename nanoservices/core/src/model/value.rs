use std::collections::HashMap;
use std::fmt;

use chrono::DateTime;
use chrono_tz::Tz;

/// A record as a source produces it: column name to untyped string.
pub type RawRecord = HashMap<String, String>;

/// A field value after conversion against its column type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Tz>),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Short variant name used in binding diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            TypedValue::Null => "null",
            TypedValue::Text(_) => "text",
            TypedValue::Integer(_) => "integer",
            TypedValue::Float(_) => "float",
            TypedValue::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => f.write_str("NULL"),
            TypedValue::Text(s) => f.write_str(s),
            TypedValue::Integer(v) => write!(f, "{v}"),
            TypedValue::Float(v) => write!(f, "{v:.4}"),
            TypedValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// A converted record. Values are positional, in model column order.
///
/// `index` is the record's position in the source output and is carried
/// through to failure logs and the rejection ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord {
    index: usize,
    values: Vec<TypedValue>,
}

impl TypedRecord {
    pub fn new(index: usize, values: Vec<TypedValue>) -> Self {
        Self { index, values }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn values(&self) -> &[TypedValue] {
        &self.values
    }

    pub fn get(&self, position: usize) -> Option<&TypedValue> {
        self.values.get(position)
    }
}
