use thiserror::Error;

// Per-row schema problems are not errors here; they are collected as
// FieldError values inside a validation result.
#[derive(Debug, Error)]
pub enum InsightsError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("cannot summarize an empty {0}")]
    EmptyInput(&'static str),

    #[error("unsupported upload format '{0}': only CSV, Parquet or JSON uploads are supported")]
    UnsupportedFormat(String),

    #[error("csv parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, InsightsError>;
