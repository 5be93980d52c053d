use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("json column could not be decoded: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored {field} has unexpected value '{value}'")]
    Corrupt { field: &'static str, value: String },
    #[error("record store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv buffer could not be flushed: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv output is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}
