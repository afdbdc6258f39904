//! Error types for the vigil engine.
//!
//! Every error here is contained within one series' pipeline. None of them
//! abort processing of other series or the retraining sweep.

use chrono::{DateTime, Utc};
use thiserror::Error;
use vigil_types::{ModelVersion, SeriesKey};

/// Errors from [`crate::WindowBuffer::ingest`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// Record arrived further behind the sealed boundary than the grace period allows.
    #[error(
        "record for {series} at {timestamp} rejected: {lateness_ms}ms behind sealed boundary {boundary}"
    )]
    OutOfOrderRejected {
        series: SeriesKey,
        timestamp: DateTime<Utc>,
        boundary: DateTime<Utc>,
        lateness_ms: i64,
    },
}

/// Result type for ingestion.
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors reading from the model store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelStoreError {
    /// No model has been trained for the series yet.
    #[error("no model for series {0}")]
    NotFound(SeriesKey),

    /// Stored model failed its integrity check.
    #[error("model {version} for series {series} failed integrity check")]
    Corrupt {
        series: SeriesKey,
        version: ModelVersion,
    },

    /// Rollback requested with no retained versions.
    #[error("no retained model version to roll back to for series {0}")]
    NothingToRollBack(SeriesKey),
}

impl ModelStoreError {
    /// Both variants mean "fall back to the bootstrap baseline" for scoring.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            ModelStoreError::NotFound(_) | ModelStoreError::Corrupt { .. }
        )
    }
}

/// Result type for model store operations.
pub type ModelStoreResult<T> = Result<T, ModelStoreError>;

/// Errors from training a model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    /// Not enough non-empty windows to train on.
    #[error("insufficient history: {available} windows, {required} required")]
    InsufficientHistory { available: usize, required: usize },

    /// Learned parameters were not finite.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// Every sample is identical, nothing to learn a spread from.
    #[error("insufficient distinct feature vectors: {distinct} distinct of {total}")]
    InsufficientDistinct { distinct: usize, total: usize },

    /// Training ran past its deadline.
    #[error("training timed out after {0}s")]
    Timeout(u64),

    /// Cancellation flag was raised between batches.
    #[error("training cancelled")]
    Cancelled,

    /// The history store could not be read.
    #[error("history unavailable: {0}")]
    History(String),

    /// The training task itself failed.
    #[error("training task failed: {0}")]
    Task(String),
}

impl TrainingError {
    /// Insufficient history defers training; everything else counts as a failure.
    pub fn is_deferral(&self) -> bool {
        matches!(self, TrainingError::InsufficientHistory { .. })
    }
}

/// Result type for training.
pub type TrainingResult<T> = Result<T, TrainingError>;

/// Errors from the historical window store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HistoryError {
    #[error("history backend unavailable: {0}")]
    Unavailable(String),

    #[error("history backend error: {0}")]
    Backend(String),
}

/// Result type for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors from alert operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlertError {
    #[error("alert not found: {0}")]
    NotFound(String),

    #[error("alert {id} is {state}, cannot {action}")]
    InvalidTransition {
        id: String,
        state: String,
        action: &'static str,
    },
}

/// Result type for alert operations.
pub type AlertResult<T> = Result<T, AlertError>;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors building the log normalizer or template matcher.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("template {event_id} does not compile: {source}")]
    InvalidTemplate {
        event_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("mask pattern does not compile: {0}")]
    Mask(#[from] regex::Error),
}

/// Result type for log ingress.
pub type LogResult<T> = Result<T, LogError>;

/// Umbrella error for the engine.
#[derive(Debug, Error)]
pub enum VigilError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    ModelStore(#[from] ModelStoreError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Alert(#[from] AlertError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("executor shut down")]
    ExecutorClosed,
}

/// Result type for engine operations.
pub type VigilResult<T> = Result<T, VigilError>;
