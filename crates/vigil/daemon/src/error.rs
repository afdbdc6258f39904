//! Error types for vigil-daemon

use std::path::PathBuf;

use thiserror::Error;
use vigil_engine::{ConfigError, LogError, VigilError};

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("failed to load templates from {path}: {reason}")]
    Templates { path: PathBuf, reason: String },

    #[error("log ingress error: {0}")]
    Log(#[from] LogError),

    #[error("engine error: {0}")]
    Engine(#[from] VigilError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
