//! Error types for oracle_sync

use std::time::Duration;

use thiserror::Error;

use crate::sync::SyncReport;

/// Result type for oracle_sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for oracle_sync
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Unreachable database, authentication failure or lost session
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Introspection error reading {object}: {message}")]
    IntrospectionError { object: String, message: String },

    #[error("Comparison error: {0}")]
    ComparisonError(String),

    #[error("Generation error for table {table}: {message}")]
    GenerationError { table: String, message: String },

    /// A generated statement failed while being applied. The report lists
    /// what was committed before the failure.
    #[error("Apply error on table {table} executing `{statement}`: {message}")]
    ApplyError {
        statement: String,
        table: String,
        message: String,
        report: Box<SyncReport>,
    },

    #[error("Timed out after {elapsed:?}: {operation}")]
    Timeout { operation: String, elapsed: Duration },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Whether retrying the same read could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ConnectionError(_) | Error::Timeout { .. })
    }
}

/// Convert Serde JSON errors to oracle_sync errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to oracle_sync errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}
