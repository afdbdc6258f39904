//! Property tests for the windowing, extraction, alerting and training contracts.
//!
//! Verifies that late records are kept or dropped purely by the grace
//! period, that extraction is deterministic, that anomalies on one series
//! never produce more than one active alert, and that no model is trained
//! from too little history.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use vigil_engine::*;
use vigil_types::{
    AlertEventKind, DetectorKind, FeatureVector, Record, ScoreResult, SeriesKey, Window, WindowId,
    FEATURE_LEN,
};

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

fn replay_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(t0() + Duration::days(1)))
}

/// Finite sample values in a realistic metric range.
fn arb_values(min: usize, max: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0e6..1.0e6f64, min..max)
}

/// One sealed window of `values`, 50ms apart.
fn sealed_window(values: &[f64]) -> Window {
    let key = SeriesKey::new("prop.series");
    let records = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            Record::new(key.clone(), t0() + Duration::milliseconds(i as i64 * 50), *value)
        })
        .collect();
    Window::sealed(key, WindowId(0), t0(), t0() + Duration::minutes(1), records)
}

fn score_result(key: &SeriesKey, index: i64, decision: bool) -> ScoreResult {
    let start = t0() + Duration::minutes(index);
    ScoreResult {
        series: key.clone(),
        window_id: WindowId(index as u64),
        window_start: start,
        window_end: start + Duration::minutes(1),
        score: if decision { 0.9 } else { 0.1 },
        decision,
        threshold: 0.5,
        model_version: None,
        scored_at: start + Duration::minutes(1),
    }
}

fn feature_vector(key: &SeriesKey, id: u64, mean: f64) -> FeatureVector {
    let mut values = [0.0; FEATURE_LEN];
    values[0] = 60.0;
    values[1] = mean;
    values[3] = mean - 1.0;
    values[4] = mean + 1.0;
    FeatureVector {
        series: key.clone(),
        window_id: WindowId(id),
        window_start: t0(),
        window_end: t0() + Duration::minutes(1),
        values,
        empty: false,
    }
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// A record behind the sealed boundary is kept exactly when its lateness
    /// is within the grace period.
    #[test]
    fn late_record_kept_iff_within_grace(grace in 0u64..60, lateness_ms in 1i64..120_000) {
        let config = WindowConfig { grace_period_secs: grace, ..Default::default() };
        let buffer = WindowBuffer::new(config, replay_clock());
        let key = SeriesKey::new("prop.late");

        buffer.ingest(Record::new(key.clone(), t0(), 1.0)).unwrap();
        let boundary = t0() + Duration::minutes(1);
        buffer.seal(&key, boundary).unwrap();

        let late = Record::new(key.clone(), boundary - Duration::milliseconds(lateness_ms), 2.0);
        let accepted = buffer.ingest(late).is_ok();

        prop_assert_eq!(accepted, lateness_ms <= grace as i64 * 1000);
        prop_assert_eq!(buffer.dropped(&key), u64::from(!accepted));
    }

    /// Extraction is a pure function of the window.
    #[test]
    fn extract_is_bit_deterministic(values in arb_values(0, 200)) {
        let window = sealed_window(&values);
        let a = extract(&window);
        let b = extract(&window);
        for i in 0..FEATURE_LEN {
            prop_assert_eq!(a.values[i].to_bits(), b.values[i].to_bits());
        }
        prop_assert_eq!(a.empty, values.is_empty());
    }

    /// Variance is zero below two samples and never negative otherwise.
    #[test]
    fn variance_defined_for_small_windows(values in arb_values(0, 50)) {
        let fv = extract(&sealed_window(&values));
        if values.len() < 2 {
            prop_assert_eq!(fv.variance(), 0.0);
        } else {
            prop_assert!(fv.variance() >= 0.0);
        }
        prop_assert!(fv.values.iter().all(|v| v.is_finite()));
    }

    /// Any run of anomalous results opens exactly one alert, and only the
    /// cooldown resolves it.
    #[test]
    fn anomaly_runs_dedup_to_one_alert(
        anomalies in 1usize..30,
        cooldown in 1u32..6,
        calm in 0u32..8,
    ) {
        let emitter = AlertEmitter::new(
            AlertingConfig { cooldown_count: cooldown, renotify_interval_secs: 3600 },
            replay_clock(),
        );
        let key = SeriesKey::new("prop.alert");

        let mut opened = 0;
        for i in 0..anomalies {
            if let Some(event) = emitter.handle(&score_result(&key, i as i64, true)) {
                if event.kind == AlertEventKind::Opened {
                    opened += 1;
                }
            }
            prop_assert_eq!(emitter.active_alerts().len(), 1);
        }
        prop_assert_eq!(opened, 1);
        prop_assert_eq!(
            emitter.active_alert(&key).unwrap().anomalous_windows as usize,
            anomalies
        );

        let mut resolved = false;
        for j in 0..calm {
            let index = (anomalies as u32 + j) as i64;
            if let Some(event) = emitter.handle(&score_result(&key, index, false)) {
                prop_assert_eq!(event.kind, AlertEventKind::Resolved);
                prop_assert_eq!(j + 1, cooldown);
                resolved = true;
            }
        }
        prop_assert_eq!(resolved, calm >= cooldown);
        prop_assert_eq!(emitter.active_alert(&key).is_none(), resolved);
    }

    /// No model is ever trained from fewer non-empty windows than required.
    #[test]
    fn no_model_below_minimum_history(available in 0usize..40, required in 2usize..40) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let config = TrainingConfig {
                min_training_windows: required,
                max_training_windows: 100,
                ..Default::default()
            };
            let store = Arc::new(ModelStore::new(config.clone()));
            let history = Arc::new(InMemoryHistory::new(100));
            let detector =
                build_detector(DetectorKind::RobustZScore, &ScoringConfig::default(), 16);
            let scheduler = RetrainingScheduler::new(
                config,
                store.clone(),
                history.clone(),
                detector,
                replay_clock(),
            );

            let key = SeriesKey::new("prop.train");
            store.register(&key);
            for i in 0..available {
                let mean = 10.0 + (i % 5) as f64;
                history.append(feature_vector(&key, i as u64, mean)).await.unwrap();
            }

            let report = scheduler.run_sweep().await;
            let trained = store.latest(&key).is_some();
            prop_assert_eq!(trained, report.trained == 1);
            if available < required {
                prop_assert!(!trained);
                prop_assert_eq!(report.deferred, 1);
            } else if available >= 2 {
                prop_assert!(trained);
            }
            Ok(())
        })?;
    }
}
