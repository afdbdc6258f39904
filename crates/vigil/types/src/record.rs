//! Observability records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::SeriesKey;

/// One observability event on a series.
///
/// `tags` carries annotations that do not take part in series identity
/// (the identity tags live on the [`SeriesKey`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Series the record belongs to
    pub series: SeriesKey,

    /// Observation time
    pub timestamp: DateTime<Utc>,

    /// Observed value
    pub value: f64,

    /// Optional annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Record {
    pub fn new(series: SeriesKey, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            series,
            timestamp,
            value,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serde() {
        let ts = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = Record::new(SeriesKey::new("cpu.load").with_tag("host", "a"), ts, 0.5)
            .with_tag("source", "agent");

        let json = serde_json::to_string(&record).unwrap();
        let restored: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_record_without_tags_deserializes() {
        let json = r#"{"series":{"name":"mem"},"timestamp":"2026-01-01T00:00:00Z","value":1.0}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.series.name(), "mem");
        assert!(record.tags.is_empty());
    }
}
