//! WolfControl Error Types

use thiserror::Error;

/// Result type alias for WolfControl operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfControl error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store operation on {key} timed out after {timeout_ms}ms")]
    StoreTimeout { key: String, timeout_ms: u64 },

    #[error("Stored value {key} is corrupted: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    // Rebind errors
    #[error("Object {object_id} references unknown id {missing_id}")]
    ReferenceResolution { object_id: String, missing_id: String },

    #[error("Activation of {object_id} failed: {reason}")]
    Activation { object_id: String, reason: String },

    #[error("Record {id} written by platform version {found}, which is not compatible with {supported}")]
    IncompatibleVersion {
        id: String,
        found: String,
        supported: String,
    },

    #[error("Type registry error: {0}")]
    Registry(String),

    // State errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::StoreTimeout { .. } | Error::Io(_) | Error::Timeout(_)
        )
    }

    /// Check if this error must abort node startup
    pub fn is_fatal_to_startup(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::ConfigParse(_) | Error::IncompatibleVersion { .. }
        )
    }
}
