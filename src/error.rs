use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data source error for '{}': {reason}", path.display())]
    DataSource { path: PathBuf, reason: String },

    #[error("Filter configuration error: {0}")]
    FilterConfig(String),

    #[error("Join key error: {0}")]
    JoinKey(String),

    #[error("Export to '{}' failed: {reason}", path.display())]
    Export {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Column '{column}' not found (available: {available})")]
    ColumnNotFound { column: String, available: String },

    #[error("Column '{column}' has type {actual}, expected {expected}")]
    ColumnType {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl ProcessingError {
    pub fn data_source(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ProcessingError::DataSource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn export(
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
        source: Option<std::io::Error>,
    ) -> Self {
        ProcessingError::Export {
            path: path.into(),
            reason: reason.into(),
            source,
        }
    }
}
