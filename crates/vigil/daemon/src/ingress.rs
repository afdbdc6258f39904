//! NDJSON ingress.
//!
//! One JSON object per line, discriminated by `type`:
//!
//! ```text
//! {"type":"metric","series":"cpu.load","tags":{"host":"web-1"},"timestamp":"2026-03-01T12:00:00Z","value":0.42}
//! {"type":"log","timestamp":"2026-03-01T12:00:01Z","level":"ERROR","content":"Connection to db-1 timed out"}
//! {"type":"ack","alert_id":"6f1c..."}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_engine::{EventTemplate, LogLine};
use vigil_types::{AlertId, Record, SeriesKey};

use crate::error::{DaemonError, DaemonResult};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngressLine {
    /// A metric sample
    Metric {
        series: String,
        #[serde(default)]
        tags: BTreeMap<String, String>,
        timestamp: DateTime<Utc>,
        value: f64,
    },

    /// A raw log line, counted through the log templates
    Log(LogLine),

    /// Acknowledge an open alert
    Ack { alert_id: AlertId },
}

impl IngressLine {
    /// Parse one line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Option<Result<Self, serde_json::Error>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        Some(serde_json::from_str(line))
    }

    /// The record of a metric line.
    pub fn into_record(self) -> Option<Record> {
        match self {
            IngressLine::Metric {
                series,
                tags,
                timestamp,
                value,
            } => Some(Record::new(
                SeriesKey::new(series).with_tags(tags),
                timestamp,
                value,
            )),
            _ => None,
        }
    }
}

/// Read the JSON template list at `path`.
pub async fn load_templates(path: &Path) -> DaemonResult<Vec<EventTemplate>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DaemonError::Templates {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    serde_json::from_str(&raw).map_err(|e| DaemonError::Templates {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metric_line() {
        let line = r#"{"type":"metric","series":"cpu.load","tags":{"host":"web-1"},"timestamp":"2026-03-01T12:00:00Z","value":0.42}"#;
        let parsed = IngressLine::parse(line).unwrap().unwrap();
        let record = parsed.into_record().unwrap();
        assert_eq!(record.series.name(), "cpu.load");
        assert_eq!(record.series.tag("host"), Some("web-1"));
        assert_eq!(record.value, 0.42);
    }

    #[test]
    fn test_parse_metric_without_tags() {
        let line = r#"{"type":"metric","series":"queue.depth","timestamp":"2026-03-01T12:00:00Z","value":3}"#;
        let record = IngressLine::parse(line).unwrap().unwrap().into_record().unwrap();
        assert!(record.series.tags().is_empty());
        assert_eq!(record.value, 3.0);
    }

    #[test]
    fn test_parse_log_line() {
        let line = r#"{"type":"log","timestamp":"2026-03-01T12:00:01Z","level":"ERROR","content":"disk full"}"#;
        match IngressLine::parse(line).unwrap().unwrap() {
            IngressLine::Log(log) => {
                assert_eq!(log.level, "ERROR");
                assert_eq!(log.content, "disk full");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_ack_line() {
        let id = AlertId::generate();
        let line = format!(r#"{{"type":"ack","alert_id":"{}"}}"#, id.as_uuid());
        assert_eq!(
            IngressLine::parse(&line).unwrap().unwrap(),
            IngressLine::Ack { alert_id: id }
        );
    }

    #[test]
    fn test_blank_and_comment_lines_skipped() {
        assert!(IngressLine::parse("   ").is_none());
        assert!(IngressLine::parse("# replay of 2026-03-01").is_none());
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(IngressLine::parse(r#"{"type":"metric","series":"x"}"#)
            .unwrap()
            .is_err());
        assert!(IngressLine::parse("not json").unwrap().is_err());
    }

    #[tokio::test]
    async fn test_load_templates() {
        let path = std::env::temp_dir().join(format!("vigild-templates-{}.json", std::process::id()));
        tokio::fs::write(
            &path,
            r#"[{"event_id":"E1","template":"Job <*> failed","abnormal":true},{"event_id":"E2","template":"Job <*> done"}]"#,
        )
        .await
        .unwrap();

        let templates = load_templates(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.ok();

        assert_eq!(templates.len(), 2);
        assert!(templates[0].abnormal);
        assert!(!templates[1].abnormal);
    }

    #[tokio::test]
    async fn test_missing_templates_file() {
        let err = load_templates(Path::new("/nonexistent/templates.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Templates { .. }));
    }
}
