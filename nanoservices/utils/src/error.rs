use thiserror::Error;
use reqwest::Error as ReqwestError;
use tokio_postgres::Error as PostgresError;
use deadpool_postgres::{BuildError as PoolBuildError, PoolError};
use url::ParseError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Reqwest Error: {0}")]
    RestSourceError(#[from] ReqwestError),

    #[error("Io Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Url Error: {0}")]
    UrlParseError(#[from] ParseError),

    #[error("Csv Error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Json Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Yaml Error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Postgres Error: {0}")]
    PostgresError(#[from] PostgresError),

    #[error("Pool Error: {0}")]
    PoolError(#[from] PoolError),

    #[error("Pool Build Error: {0}")]
    PoolBuildError(#[from] PoolBuildError),

    #[error("Sqlite Error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}
