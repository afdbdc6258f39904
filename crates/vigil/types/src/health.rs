//! Per-series model lifecycle and health reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ModelVersion, SeriesKey};

/// Retraining lifecycle of a series' model.
///
/// `Untrained -> Training -> Active -> Stale -> Training -> Active -> ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelState {
    #[default]
    Untrained,
    Training,
    Active,
    Stale,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Untrained => write!(f, "untrained"),
            ModelState::Training => write!(f, "training"),
            ModelState::Active => write!(f, "active"),
            ModelState::Stale => write!(f, "stale"),
        }
    }
}

/// Health snapshot for one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesHealth {
    pub series: SeriesKey,
    pub state: ModelState,
    pub active_version: Option<ModelVersion>,

    /// Consecutive failed training attempts
    pub failure_streak: u32,

    /// Set once the failure streak reaches the configured limit
    pub degraded: bool,

    pub last_error: Option<String>,
    pub last_trained_at: Option<DateTime<Utc>>,
}
