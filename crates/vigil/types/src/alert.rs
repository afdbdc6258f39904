//! Alerts raised from anomalous scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::SeriesKey;

/// Unique identifier for an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alert:{}", self.0)
    }
}

/// Alert lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertState {
    /// Open and acknowledged alerts both absorb new anomalies.
    pub fn is_active(&self) -> bool {
        !matches!(self, AlertState::Resolved)
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertState::Open => write!(f, "OPEN"),
            AlertState::Acknowledged => write!(f, "ACKNOWLEDGED"),
            AlertState::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// An incident on one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub series: SeriesKey,
    pub state: AlertState,

    /// Start of the first anomalous window
    pub started_at: DateTime<Utc>,

    /// End of the latest anomalous window
    pub last_anomalous_at: DateTime<Utc>,

    /// Highest score merged into this alert
    pub peak_score: f64,

    /// Anomalous windows merged into this alert
    pub anomalous_windows: u32,

    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn open(
        series: SeriesKey,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        score: f64,
    ) -> Self {
        Self {
            id: AlertId::generate(),
            series,
            state: AlertState::Open,
            started_at: window_start,
            last_anomalous_at: window_end,
            peak_score: score,
            anomalous_windows: 1,
            resolved_at: None,
        }
    }

    /// Fold another anomalous window into this alert.
    pub fn merge(&mut self, window_start: DateTime<Utc>, window_end: DateTime<Utc>, score: f64) {
        self.started_at = self.started_at.min(window_start);
        self.last_anomalous_at = self.last_anomalous_at.max(window_end);
        self.peak_score = self.peak_score.max(score);
        self.anomalous_windows += 1;
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// Kind of alert transition published on the egress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEventKind {
    Opened,
    Updated,
    /// Update that is due for re-notification
    Renotified,
    Acknowledged,
    Resolved,
}

/// An alert transition together with the alert's state after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    pub alert: Alert,
}

impl AlertEvent {
    pub fn new(kind: AlertEventKind, alert: Alert) -> Self {
        Self { kind, alert }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_merge_extends_range_and_peak() {
        let t0 = Utc::now();
        let mut alert = Alert::open(SeriesKey::new("cpu"), t0, t0 + Duration::seconds(60), 0.7);
        alert.merge(
            t0 + Duration::seconds(60),
            t0 + Duration::seconds(120),
            0.9,
        );
        alert.merge(
            t0 + Duration::seconds(120),
            t0 + Duration::seconds(180),
            0.8,
        );

        assert_eq!(alert.started_at, t0);
        assert_eq!(alert.last_anomalous_at, t0 + Duration::seconds(180));
        assert_eq!(alert.peak_score, 0.9);
        assert_eq!(alert.anomalous_windows, 3);
        assert!(alert.is_active());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&AlertState::Acknowledged).unwrap();
        assert_eq!(json, "\"ACKNOWLEDGED\"");
        assert!(AlertState::Acknowledged.is_active());
        assert!(!AlertState::Resolved.is_active());
    }
}
