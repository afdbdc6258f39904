//! Sealed windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Record, SeriesKey};

/// Per-series window sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowId(pub u64);

impl WindowId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// A sealed window of records for one series.
///
/// Records are non-decreasing in timestamp. Late records accepted within the
/// grace period belong to the window that was open when they arrived, so a
/// record may sit slightly before `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    series: SeriesKey,
    id: WindowId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    records: Vec<Record>,
}

impl Window {
    /// Seal a window. `records` must already be sorted by timestamp.
    pub fn sealed(
        series: SeriesKey,
        id: WindowId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        records: Vec<Record>,
    ) -> Self {
        debug_assert!(records
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
        Self {
            series,
            id,
            start,
            end,
            records,
        }
    }

    pub fn series(&self) -> &SeriesKey {
        &self.series
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values in timestamp order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.records.iter().map(|r| r.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_window_accessors() {
        let start = Utc::now();
        let key = SeriesKey::new("cpu");
        let records = vec![
            Record::new(key.clone(), start, 1.0),
            Record::new(key.clone(), start + Duration::seconds(1), 2.0),
        ];
        let window = Window::sealed(
            key,
            WindowId(3),
            start,
            start + Duration::seconds(60),
            records,
        );

        assert_eq!(window.len(), 2);
        assert!(!window.is_empty());
        assert_eq!(window.values().collect::<Vec<_>>(), vec![1.0, 2.0]);
        assert_eq!(window.id().next(), WindowId(4));
        assert_eq!(window.id().to_string(), "w3");
    }
}
