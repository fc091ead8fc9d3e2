//! Error handling for the storage role.

use std::fmt;

/// Errors that can occur while persisting or restoring the share chain.
#[derive(Debug)]
pub enum StorageError {
    /// Backend-specific failure (database or filesystem errors)
    BackendError(String),
    /// A record could not be encoded or decoded
    SerializationError(String),
    /// A stored share no longer decodes against the network rules
    InvalidData(String),
    /// Configuration could not be loaded
    ConfigError(String),
    /// The backend was used before `initialize` or after `close`
    BackendUnavailable,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::BackendError(msg) => write!(f, "Backend error: {}", msg),
            StorageError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            StorageError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            StorageError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            StorageError::BackendUnavailable => write!(f, "Storage backend unavailable"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::BackendError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<ext_config::ConfigError> for StorageError {
    fn from(err: ext_config::ConfigError) -> Self {
        StorageError::ConfigError(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
