//! Event window buffer.
//!
//! Accumulates records per series into aligned, fixed-length windows.
//! Each series has its own lock inside a sharded map, so producers writing
//! to different series never contend. Sealed windows are queued per series
//! in sealing order and handed off exactly once through [`WindowBuffer::take_sealed`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};
use vigil_types::{Record, SeriesKey, Window, WindowId};

use crate::clock::Clock;
use crate::config::WindowConfig;
use crate::error::{IngestError, IngestResult};

/// What happened to an accepted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Appended to the open window.
    Buffered,
    /// Appended and the window hit capacity, so it was sealed.
    Sealed(WindowId),
}

struct SeriesBuffer {
    key: SeriesKey,
    next_id: WindowId,
    open_start: DateTime<Utc>,
    /// End of the most recently sealed window.
    boundary: Option<DateTime<Utc>>,
    records: Vec<Record>,
    sealed: VecDeque<Window>,
    dropped: u64,
    last_seen: DateTime<Utc>,
    retired: bool,
}

impl SeriesBuffer {
    fn new(key: SeriesKey, open_start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            key,
            next_id: WindowId(0),
            open_start,
            boundary: None,
            records: Vec::new(),
            sealed: VecDeque::new(),
            dropped: 0,
            last_seen: now,
            retired: false,
        }
    }

    /// Insert keeping timestamp order; equal timestamps keep arrival order.
    fn insert(&mut self, record: Record) {
        let at = self
            .records
            .partition_point(|r| r.timestamp <= record.timestamp);
        self.records.insert(at, record);
    }

    /// Boundary for an early seal: just past the newest record, but never
    /// past the clock, so a record ahead of the clock cannot push the
    /// boundary into the future. Records beyond it carry over.
    ///
    /// `None` when no buffered record lies before that boundary.
    fn early_boundary(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let last = self.records.last()?.timestamp;
        let tick = Duration::nanoseconds(1);
        let boundary = (last + tick).min((now + tick).max(self.open_start + tick));
        let first = self.records.first()?.timestamp;
        (first < boundary).then_some(boundary)
    }

    /// Seal everything before `boundary`; later records carry over.
    fn seal_at(&mut self, boundary: DateTime<Utc>) -> Option<WindowId> {
        if boundary <= self.open_start {
            return None;
        }

        let split = self.records.partition_point(|r| r.timestamp < boundary);
        let carry = self.records.split_off(split);
        let records = std::mem::replace(&mut self.records, carry);

        let id = self.next_id;
        self.next_id = id.next();

        let window = Window::sealed(self.key.clone(), id, self.open_start, boundary, records);
        debug!(
            series = %self.key,
            window = %id,
            records = window.len(),
            end = %boundary,
            "Sealed window"
        );

        self.sealed.push_back(window);
        self.open_start = boundary;
        self.boundary = Some(boundary);
        Some(id)
    }
}

/// Per-series window accumulator.
pub struct WindowBuffer {
    config: WindowConfig,
    clock: Arc<dyn Clock>,
    series: DashMap<SeriesKey, Arc<Mutex<SeriesBuffer>>>,
    total_dropped: AtomicU64,
}

impl WindowBuffer {
    pub fn new(config: WindowConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            series: DashMap::new(),
            total_dropped: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Accept a record into its series' open window.
    ///
    /// Unknown series are created on first record. A record more than the
    /// grace period behind the last sealed boundary is dropped and counted.
    pub fn ingest(&self, mut record: Record) -> IngestResult<IngestOutcome> {
        let now = self.clock.now();

        if record.timestamp > now + self.config.max_future_skew() {
            debug!(
                series = %record.series,
                timestamp = %record.timestamp,
                now = %now,
                "Clamping future timestamp to clock"
            );
            record.timestamp = now;
        }

        let slot = self.slot(&record.series, record.timestamp, now);
        let mut buffer = slot.lock();
        buffer.last_seen = now;

        if buffer.retired {
            buffer.retired = false;
            let aligned = self.align(record.timestamp);
            if aligned > buffer.open_start {
                buffer.open_start = aligned;
            }
            info!(series = %buffer.key, "Series revived");
        }

        if let Some(boundary) = buffer.boundary {
            if record.timestamp < boundary {
                let lateness = boundary - record.timestamp;
                if lateness > self.config.grace_period() {
                    buffer.dropped += 1;
                    self.total_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        series = %buffer.key,
                        lateness_ms = lateness.num_milliseconds(),
                        "Dropping out-of-order record"
                    );
                    return Err(IngestError::OutOfOrderRejected {
                        series: record.series,
                        timestamp: record.timestamp,
                        boundary,
                        lateness_ms: lateness.num_milliseconds(),
                    });
                }
            }
        }

        buffer.insert(record);

        // Records ahead of the clock stay open until the clock reaches them.
        if buffer.records.len() >= self.config.max_records {
            if let Some(boundary) = buffer.early_boundary(now) {
                if let Some(id) = buffer.seal_at(boundary) {
                    return Ok(IngestOutcome::Sealed(id));
                }
            }
        }

        Ok(IngestOutcome::Buffered)
    }

    /// Close the open window of `series` at `boundary`.
    ///
    /// Records at or after `boundary` stay in the new open window. Returns
    /// `None` for unknown series or a boundary not after the open window's start.
    pub fn seal(&self, series: &SeriesKey, boundary: DateTime<Utc>) -> Option<WindowId> {
        let slot = self.series.get(series).map(|s| s.value().clone())?;
        let mut buffer = slot.lock();
        buffer.seal_at(boundary)
    }

    /// Seal every window whose full duration has elapsed by `now`.
    ///
    /// Returns the series that gained sealed windows.
    pub fn seal_due(&self, now: DateTime<Utc>) -> Vec<SeriesKey> {
        let duration = self.config.duration();
        let mut touched = Vec::new();

        for slot in self.slots() {
            let mut buffer = slot.lock();
            if buffer.retired {
                continue;
            }

            let mut sealed = 0;
            while buffer.open_start + duration <= now && sealed < self.config.max_catch_up_windows
            {
                let boundary = buffer.open_start + duration;
                if buffer.seal_at(boundary).is_some() {
                    sealed += 1;
                }
            }

            if buffer.open_start + duration <= now {
                let current = self.align(now);
                debug!(
                    series = %buffer.key,
                    from = %buffer.open_start,
                    to = %current,
                    "Skipping ahead after catch-up limit"
                );
                if buffer.seal_at(current).is_some() {
                    sealed += 1;
                }
            }

            if sealed > 0 {
                touched.push(buffer.key.clone());
            }
        }

        touched
    }

    /// Logically retire series idle for longer than the TTL.
    ///
    /// Buffered records are sealed first so nothing is stranded.
    pub fn retire_idle(&self, now: DateTime<Utc>) -> Vec<SeriesKey> {
        let ttl = self.config.series_ttl();
        let mut retired = Vec::new();

        for slot in self.slots() {
            let mut buffer = slot.lock();
            if buffer.retired || now - buffer.last_seen < ttl {
                continue;
            }

            if let Some(boundary) = buffer.early_boundary(now) {
                buffer.seal_at(boundary);
            }

            buffer.retired = true;
            info!(series = %buffer.key, idle_secs = (now - buffer.last_seen).num_seconds(), "Series retired");
            retired.push(buffer.key.clone());
        }

        retired
    }

    /// Hand the oldest sealed window of `series` to the caller.
    pub fn take_sealed(&self, series: &SeriesKey) -> Option<Window> {
        let slot = self.series.get(series).map(|s| s.value().clone())?;
        let mut buffer = slot.lock();
        buffer.sealed.pop_front()
    }

    /// Sealed windows waiting for hand-off.
    pub fn pending(&self, series: &SeriesKey) -> usize {
        self.series
            .get(series)
            .map(|s| s.value().lock().sealed.len())
            .unwrap_or(0)
    }

    /// Records currently in the open window.
    pub fn open_len(&self, series: &SeriesKey) -> usize {
        self.series
            .get(series)
            .map(|s| s.value().lock().records.len())
            .unwrap_or(0)
    }

    /// Records rejected for `series`.
    pub fn dropped(&self, series: &SeriesKey) -> u64 {
        self.series
            .get(series)
            .map(|s| s.value().lock().dropped)
            .unwrap_or(0)
    }

    /// Records rejected across all series.
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn is_retired(&self, series: &SeriesKey) -> bool {
        self.series
            .get(series)
            .map(|s| s.value().lock().retired)
            .unwrap_or(false)
    }

    /// Every series ever seen, retired or not.
    pub fn series(&self) -> Vec<SeriesKey> {
        self.series.iter().map(|e| e.key().clone()).collect()
    }

    fn slots(&self) -> Vec<Arc<Mutex<SeriesBuffer>>> {
        self.series.iter().map(|e| e.value().clone()).collect()
    }

    fn slot(
        &self,
        key: &SeriesKey,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Arc<Mutex<SeriesBuffer>> {
        if let Some(existing) = self.series.get(key) {
            return existing.value().clone();
        }

        self.series
            .entry(key.clone())
            .or_insert_with(|| {
                info!(series = %key, "New series");
                Arc::new(Mutex::new(SeriesBuffer::new(
                    key.clone(),
                    self.align(timestamp),
                    now,
                )))
            })
            .value()
            .clone()
    }

    /// Start of the aligned window containing `ts`.
    fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.config.duration().num_milliseconds().max(1);
        let millis = ts.timestamp_millis();
        DateTime::<Utc>::from_timestamp_millis(millis - millis.rem_euclid(width)).unwrap_or(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn buffer_with(config: WindowConfig) -> (WindowBuffer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0() + Duration::hours(1)));
        (WindowBuffer::new(config, clock.clone()), clock)
    }

    fn record(key: &SeriesKey, offset_secs: i64, value: f64) -> Record {
        Record::new(key.clone(), t0() + Duration::seconds(offset_secs), value)
    }

    #[test]
    fn test_ingest_creates_series_and_buffers() {
        let (buffer, _) = buffer_with(WindowConfig::default());
        let key = SeriesKey::new("cpu.load");

        assert_eq!(
            buffer.ingest(record(&key, 1, 1.0)).unwrap(),
            IngestOutcome::Buffered
        );
        assert_eq!(buffer.open_len(&key), 1);
        assert_eq!(buffer.series(), vec![key]);
    }

    #[test]
    fn test_out_of_order_records_sorted_within_window() {
        let (buffer, _) = buffer_with(WindowConfig::default());
        let key = SeriesKey::new("cpu.load");

        buffer.ingest(record(&key, 10, 3.0)).unwrap();
        buffer.ingest(record(&key, 2, 1.0)).unwrap();
        buffer.ingest(record(&key, 5, 2.0)).unwrap();

        buffer.seal(&key, t0() + Duration::seconds(60)).unwrap();
        let window = buffer.take_sealed(&key).unwrap();
        assert_eq!(window.values().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_grace_period_accepts_and_rejects() {
        let config = WindowConfig {
            grace_period_secs: 5,
            ..Default::default()
        };
        let (buffer, _) = buffer_with(config);
        let key = SeriesKey::new("cpu.load");
        buffer.ingest(record(&key, 1, 1.0)).unwrap();

        let boundary = t0() + Duration::seconds(60);
        buffer.seal(&key, boundary).unwrap();

        // 2s late: accepted
        assert!(buffer.ingest(record(&key, 58, 2.0)).is_ok());

        // 30s late: rejected and counted
        let err = buffer.ingest(record(&key, 30, 3.0)).unwrap_err();
        assert!(matches!(
            err,
            IngestError::OutOfOrderRejected { lateness_ms: 30_000, .. }
        ));
        assert_eq!(buffer.dropped(&key), 1);
        assert_eq!(buffer.total_dropped(), 1);

        buffer.seal(&key, t0() + Duration::seconds(120)).unwrap();
        buffer.take_sealed(&key).unwrap();
        let second = buffer.take_sealed(&key).unwrap();
        assert_eq!(second.values().collect::<Vec<_>>(), vec![2.0]);
    }

    #[test]
    fn test_seal_carries_later_records_over() {
        let (buffer, _) = buffer_with(WindowConfig::default());
        let key = SeriesKey::new("mem");
        buffer.ingest(record(&key, 10, 1.0)).unwrap();
        buffer.ingest(record(&key, 70, 2.0)).unwrap();

        buffer.seal(&key, t0() + Duration::seconds(60)).unwrap();
        let window = buffer.take_sealed(&key).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(buffer.open_len(&key), 1);
    }

    #[test]
    fn test_seal_rejects_stale_boundary() {
        let (buffer, _) = buffer_with(WindowConfig::default());
        let key = SeriesKey::new("mem");
        buffer.ingest(record(&key, 10, 1.0)).unwrap();

        assert!(buffer.seal(&key, t0() + Duration::seconds(60)).is_some());
        assert!(buffer.seal(&key, t0() + Duration::seconds(30)).is_none());
        assert!(buffer.seal(&SeriesKey::new("unknown"), t0()).is_none());
    }

    #[test]
    fn test_capacity_seals_window() {
        let config = WindowConfig {
            max_records: 3,
            ..Default::default()
        };
        let (buffer, _) = buffer_with(config);
        let key = SeriesKey::new("requests");

        buffer.ingest(record(&key, 1, 1.0)).unwrap();
        buffer.ingest(record(&key, 2, 1.0)).unwrap();
        let outcome = buffer.ingest(record(&key, 3, 1.0)).unwrap();

        assert_eq!(outcome, IngestOutcome::Sealed(WindowId(0)));
        assert_eq!(buffer.take_sealed(&key).unwrap().len(), 3);
        assert_eq!(buffer.open_len(&key), 0);
    }

    #[test]
    fn test_capacity_seal_never_passes_the_clock() {
        let config = WindowConfig {
            max_records: 2,
            ..Default::default()
        };
        let (buffer, clock) = buffer_with(config);
        let key = SeriesKey::new("cpu");
        let now = clock.now();

        buffer.ingest(Record::new(key.clone(), now, 1.0)).unwrap();
        // Ahead of the clock but within the allowed skew
        let outcome = buffer
            .ingest(Record::new(key.clone(), now + Duration::seconds(200), 2.0))
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Sealed(WindowId(0)));
        assert_eq!(buffer.take_sealed(&key).unwrap().len(), 1);

        // On-time data after the skewed record is still accepted
        let outcome = buffer
            .ingest(Record::new(key.clone(), now + Duration::seconds(1), 3.0))
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Buffered);
        assert_eq!(buffer.dropped(&key), 0);
        assert_eq!(buffer.open_len(&key), 2);

        clock.advance(Duration::seconds(300));
        let outcome = buffer
            .ingest(Record::new(key.clone(), clock.now(), 4.0))
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Sealed(WindowId(1)));
        let window = buffer.take_sealed(&key).unwrap();
        assert_eq!(window.values().collect::<Vec<_>>(), vec![3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_retire_keeps_records_ahead_of_the_clock() {
        let config = WindowConfig {
            series_ttl_secs: 60,
            ..Default::default()
        };
        let (buffer, clock) = buffer_with(config);
        let key = SeriesKey::new("batch.job");
        let now = clock.now();
        buffer.ingest(Record::new(key.clone(), now, 1.0)).unwrap();
        buffer
            .ingest(Record::new(key.clone(), now + Duration::seconds(250), 2.0))
            .unwrap();

        clock.advance(Duration::seconds(120));
        buffer.retire_idle(clock.now());

        assert_eq!(buffer.take_sealed(&key).unwrap().len(), 1);
        assert_eq!(buffer.open_len(&key), 1);

        // The boundary stays at the clock, so a record from just before it is kept
        buffer
            .ingest(Record::new(key.clone(), clock.now() - Duration::seconds(1), 3.0))
            .unwrap();
        assert_eq!(buffer.dropped(&key), 0);
    }

    #[test]
    fn test_seal_due_emits_empty_windows() {
        let (buffer, _) = buffer_with(WindowConfig::default());
        let key = SeriesKey::new("heartbeat");
        buffer.ingest(record(&key, 5, 1.0)).unwrap();

        let touched = buffer.seal_due(t0() + Duration::seconds(180));
        assert_eq!(touched, vec![key.clone()]);
        assert_eq!(buffer.pending(&key), 3);

        let first = buffer.take_sealed(&key).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.start(), t0());
        assert!(buffer.take_sealed(&key).unwrap().is_empty());
        assert!(buffer.take_sealed(&key).unwrap().is_empty());
    }

    #[test]
    fn test_seal_due_skips_ahead_past_catch_up_limit() {
        let config = WindowConfig {
            max_catch_up_windows: 2,
            ..Default::default()
        };
        let (buffer, _) = buffer_with(config);
        let key = SeriesKey::new("heartbeat");
        buffer.ingest(record(&key, 5, 1.0)).unwrap();

        buffer.seal_due(t0() + Duration::seconds(600));
        // two regular windows plus one catch-up window up to the aligned present
        assert_eq!(buffer.pending(&key), 3);
        assert!(buffer.seal_due(t0() + Duration::seconds(600)).is_empty());
    }

    #[test]
    fn test_future_timestamps_are_clamped() {
        let (buffer, clock) = buffer_with(WindowConfig::default());
        let key = SeriesKey::new("skewed");
        let far_future = clock.now() + Duration::days(1);

        buffer
            .ingest(Record::new(key.clone(), far_future, 1.0))
            .unwrap();
        buffer.seal(&key, clock.now() + Duration::seconds(1)).unwrap();
        let window = buffer.take_sealed(&key).unwrap();
        assert_eq!(window.records()[0].timestamp, clock.now());
    }

    #[test]
    fn test_retire_and_revive() {
        let config = WindowConfig {
            series_ttl_secs: 60,
            ..Default::default()
        };
        let (buffer, clock) = buffer_with(config);
        let key = SeriesKey::new("batch.job");
        buffer.ingest(record(&key, 5, 1.0)).unwrap();

        clock.advance(Duration::seconds(120));
        let retired = buffer.retire_idle(clock.now());
        assert_eq!(retired, vec![key.clone()]);
        assert!(buffer.is_retired(&key));
        assert_eq!(buffer.pending(&key), 1);

        // Retired series are skipped by the cadence
        assert!(buffer.seal_due(clock.now()).is_empty());

        buffer
            .ingest(Record::new(key.clone(), clock.now(), 2.0))
            .unwrap();
        assert!(!buffer.is_retired(&key));
    }
}
