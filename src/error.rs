use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the tether supervisor
#[derive(Debug, Error)]
pub enum TetherError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Process-related errors
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Supervisor is no longer running")]
    SupervisorGone,

    // HTTP listener errors
    #[error("Failed to bind health endpoint on {addr}: {source}")]
    ListenError {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a child process could not be started.
///
/// Always recovered by the supervisor and turned into a scheduled restart.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Target does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("OS refused to spawn {}: {source}", path.display())]
    OsRefused {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    /// Short machine-friendly label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            SpawnError::NotFound { .. } => "not_found",
            SpawnError::OsRefused { .. } => "os_refused",
        }
    }
}

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;
