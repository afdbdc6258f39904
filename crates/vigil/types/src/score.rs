//! Scoring outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ModelVersion, SeriesKey, WindowId};

/// Immutable result of scoring one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub series: SeriesKey,
    pub window_id: WindowId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,

    /// Normalized anomaly score in [0.0, 1.0]
    pub score: f64,

    /// True when `score >= threshold`
    pub decision: bool,

    /// Threshold the decision was taken against
    pub threshold: f64,

    /// Model used, `None` for the bootstrap baseline
    pub model_version: Option<ModelVersion>,

    pub scored_at: DateTime<Utc>,
}

impl ScoreResult {
    pub fn is_anomalous(&self) -> bool {
        self.decision
    }

    pub fn used_baseline(&self) -> bool {
        self.model_version.is_none()
    }
}
