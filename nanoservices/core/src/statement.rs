//! Table-definition and upsert statements derived from a [`Model`].

use crate::model::{ColumnType, Model};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatementError {
    #[error("model has no columns to write")]
    NoColumns,
    #[error("model has no unique key to resolve upsert conflicts on")]
    NoConflictTarget,
}

/// Column name that marks a table for time partitioning.
pub const TIME_COLUMN: &str = "time";

pub fn storage_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::String => "TEXT",
        ColumnType::BigInt => "BIGINT",
        ColumnType::Float => "NUMERIC(10,4)",
        ColumnType::Int => "INTEGER",
        ColumnType::DateTime => "TIMESTAMPTZ NOT NULL",
        ColumnType::DateTimeNullable => "TIMESTAMPTZ",
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name segment by segment.
pub fn qualify_table(table: &str) -> String {
    table.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

fn column_list(names: impl Iterator<Item = impl AsRef<str>>) -> String {
    names.map(|n| quote_ident(n.as_ref())).collect::<Vec<_>>().join(", ")
}

/// DDL that brings `table` in line with the model, in execution order.
///
/// A column-less model yields no statements. With `hypertables` set and a
/// `time` column in the unique key, a second statement converts the table
/// into a TimescaleDB hypertable; other destinations leave the flag off.
pub fn schema_statements(model: &Model, table: &str, hypertables: bool) -> Vec<String> {
    if model.is_empty() {
        return Vec::new();
    }

    let mut lines: Vec<String> = model
        .columns()
        .iter()
        .map(|c| format!("    {} {}", quote_ident(&c.name), storage_type(c.column_type)))
        .collect();
    if !model.unique_keys().is_empty() {
        lines.push(format!("    PRIMARY KEY ({})", column_list(model.unique_keys().iter())));
    }

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        qualify_table(table),
        lines.join(",\n")
    )];

    if hypertables && model.is_key(TIME_COLUMN) {
        let regclass = qualify_table(table).replace('\'', "''");
        statements.push(format!(
            "SELECT create_hypertable('{regclass}', '{TIME_COLUMN}', if_not_exists => TRUE)"
        ));
    }

    statements
}

/// Parameterized idempotent write: one `$n` placeholder per column in model
/// order, overwriting every non-key column when the unique key already exists.
pub fn upsert_statement(model: &Model, table: &str) -> Result<String, StatementError> {
    if model.is_empty() {
        return Err(StatementError::NoColumns);
    }
    if model.unique_keys().is_empty() {
        return Err(StatementError::NoConflictTarget);
    }

    let columns = model.columns();
    let placeholders = (1..=columns.len()).map(|i| format!("${i}")).collect::<Vec<_>>().join(", ");
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !model.is_key(&c.name))
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(&c.name)))
        .collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO ",
        qualify_table(table),
        column_list(columns.iter().map(|c| &c.name)),
        placeholders,
        column_list(model.unique_keys().iter()),
    );
    if updates.is_empty() {
        sql.push_str("NOTHING");
    } else {
        sql.push_str("UPDATE SET ");
        sql.push_str(&updates.join(", "));
    }
    Ok(sql)
}
