//! Egress events.
//!
//! Scores go to the audit/metrics sink, alert transitions to the notification
//! layer. Both travel in the same envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AlertEvent, ScoreResult, SeriesHealth};

/// Envelope wrapping all pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// The actual event
    pub event: PipelineEvent,
}

impl PipelineEventEnvelope {
    pub fn new(event: PipelineEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A window was scored
    Score(ScoreResult),

    /// An alert changed state
    Alert(AlertEvent),

    /// A series crossed the training-failure streak limit
    Degraded(SeriesHealth),
}
