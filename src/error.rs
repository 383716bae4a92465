use std::path::PathBuf;
use thiserror::Error;

/// Main error type for loglens
#[derive(Error, Debug)]
pub enum LoglensError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Persisted clustering state does not fit the configured engine
    #[error(
        "State version mismatch for channel '{channel}': configured depth {expected}, stored depth {found}"
    )]
    StateVersionMismatch {
        channel: String,
        expected: usize,
        found: usize,
    },

    /// Persisted clustering state is unreadable
    #[error("State file is corrupt: {0}")]
    StateCorrupt(String),

    /// State file not found
    #[error("State file not found: {path}")]
    StateNotFound { path: PathBuf },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Binary state encoding errors
    #[error("State encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for loglens operations
pub type Result<T> = std::result::Result<T, LoglensError>;
