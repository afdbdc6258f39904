//! Retraining scheduler.
//!
//! Drives every series through
//! `Untrained -> Training -> Active -> Stale -> Training -> Active -> ...`.
//! The scheduler has no timer of its own: something external calls
//! [`RetrainingScheduler::run_sweep`] on a fixed interval.
//!
//! Training runs on the blocking pool under a timeout, with a cancellation
//! flag checked between batches. A failed or cancelled run never touches
//! the active model, so scoring continues with the previous model or the
//! bootstrap baseline.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use vigil_types::{
    FeatureVector, Model, ModelState, ModelVersion, PipelineEvent, PipelineEventEnvelope,
    SeriesHealth, SeriesKey,
};

use crate::clock::Clock;
use crate::config::TrainingConfig;
use crate::detector::{CancellationFlag, Detector};
use crate::error::{TrainingError, TrainingResult};
use crate::features::percentile;
use crate::history::HistoryStore;
use crate::store::ModelStore;

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Series looked at
    pub examined: usize,
    /// Training runs started
    pub started: usize,
    /// Runs that installed a new model
    pub trained: usize,
    /// Runs deferred for insufficient history
    pub deferred: usize,
    /// Runs that failed
    pub failed: usize,
    /// Series already training
    pub skipped_in_progress: usize,
    /// Active models whose threshold was recomputed
    pub thresholds_updated: usize,
    /// Series that became degraded during this sweep
    pub degraded: Vec<SeriesKey>,
}

#[derive(Debug, Clone, Default)]
struct SeriesEntry {
    state: ModelState,
    failure_streak: u32,
    degraded: bool,
    last_error: Option<String>,
    last_trained_at: Option<DateTime<Utc>>,
    highest_version: Option<ModelVersion>,
}

/// Periodic retraining of every series known to the model store.
pub struct RetrainingScheduler {
    config: TrainingConfig,
    store: Arc<ModelStore>,
    history: Arc<dyn HistoryStore>,
    detector: Arc<dyn Detector>,
    clock: Arc<dyn Clock>,
    entries: DashMap<SeriesKey, SeriesEntry>,
    cancel: CancellationFlag,
    events: Option<broadcast::Sender<PipelineEventEnvelope>>,
}

impl RetrainingScheduler {
    pub fn new(
        config: TrainingConfig,
        store: Arc<ModelStore>,
        history: Arc<dyn HistoryStore>,
        detector: Arc<dyn Detector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            history,
            detector,
            clock,
            entries: DashMap::new(),
            cancel: CancellationFlag::new(),
            events: None,
        }
    }

    /// Publish degraded-health events on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<PipelineEventEnvelope>) -> Self {
        self.events = Some(events);
        self
    }

    /// Examine every known series once, training those that need it.
    #[instrument(skip(self))]
    pub async fn run_sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut claimed = Vec::new();

        for series in self.store.series() {
            report.examined += 1;

            if !self.needs_training(&series, now, &mut report) {
                continue;
            }
            if self.try_claim(&series) {
                report.started += 1;
                claimed.push(series);
            } else {
                report.skipped_in_progress += 1;
            }
        }

        let mut runs = stream::iter(claimed)
            .map(|series| async move {
                let outcome = self.train_series(&series).await;
                (series, outcome)
            })
            .buffer_unordered(self.config.max_concurrent.max(1));

        while let Some((series, outcome)) = runs.next().await {
            self.settle(series, outcome, &mut report);
        }

        info!(
            examined = report.examined,
            started = report.started,
            trained = report.trained,
            deferred = report.deferred,
            failed = report.failed,
            thresholds_updated = report.thresholds_updated,
            "Retraining sweep complete"
        );
        report
    }

    /// Abort in-flight training and refuse new runs until [`Self::resume`].
    pub fn cancel(&self) {
        info!("Cancelling retraining");
        self.cancel.cancel();
    }

    pub fn resume(&self) {
        self.cancel.reset();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Force a retrain of `series` on the next sweep.
    pub fn request_retrain(&self, series: &SeriesKey) {
        self.store.register(series);
        self.store.mark_stale(series);
        let mut entry = self.entries.entry(series.clone()).or_default();
        if entry.state == ModelState::Active {
            entry.state = ModelState::Stale;
        }
    }

    pub fn state(&self, series: &SeriesKey) -> ModelState {
        self.entries
            .get(series)
            .map(|e| e.state)
            .unwrap_or_default()
    }

    pub fn health(&self, series: &SeriesKey) -> SeriesHealth {
        let entry = self
            .entries
            .get(series)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        self.snapshot(series, &entry)
    }

    /// Health of every series known to the model store.
    pub fn health_all(&self) -> Vec<SeriesHealth> {
        self.store.series().iter().map(|s| self.health(s)).collect()
    }

    /// Decide whether `series` should train this sweep; refreshes the
    /// threshold of fresh active models as a side effect.
    fn needs_training(
        &self,
        series: &SeriesKey,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> bool {
        let has_model = self.store.latest(series).is_some();
        let state = {
            let mut entry = self.entries.entry(series.clone()).or_default();
            if entry.state == ModelState::Untrained && has_model {
                // Restored from a snapshot
                entry.state = ModelState::Active;
            }
            entry.state
        };

        match state {
            ModelState::Untrained | ModelState::Stale => true,
            ModelState::Training => {
                report.skipped_in_progress += 1;
                false
            }
            ModelState::Active => match self.store.staleness(series, now) {
                Some(reason) => {
                    debug!(series = %series, reason = ?reason, "Model stale");
                    self.set_state(series, ModelState::Stale);
                    true
                }
                None if !has_model => true,
                None => {
                    if self.refresh_threshold(series) {
                        report.thresholds_updated += 1;
                    }
                    false
                }
            },
        }
    }

    /// Move a series into `Training`. No-op if it already is.
    fn try_claim(&self, series: &SeriesKey) -> bool {
        let mut entry = self.entries.entry(series.clone()).or_default();
        if entry.state == ModelState::Training {
            return false;
        }
        entry.state = ModelState::Training;
        true
    }

    #[instrument(skip_all, fields(series = %series))]
    async fn train_series(&self, series: &SeriesKey) -> TrainingResult<Arc<Model>> {
        if self.cancel.is_cancelled() {
            return Err(TrainingError::Cancelled);
        }

        let samples: Vec<FeatureVector> = self
            .history
            .recent(series, self.config.max_training_windows)
            .await
            .map_err(|e| TrainingError::History(e.to_string()))?
            .into_iter()
            .filter(|v| !v.empty)
            .collect();

        if samples.len() < self.config.min_training_windows {
            return Err(TrainingError::InsufficientHistory {
                available: samples.len(),
                required: self.config.min_training_windows,
            });
        }

        let task_cancel = self.cancel.child();
        let flag = task_cancel.clone();
        let detector = self.detector.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let params = detector.train(&samples, &flag)?;
            let scores: Vec<f64> = samples
                .iter()
                .filter_map(|s| detector.score(&params, s))
                .collect();
            Ok::<_, TrainingError>((params, scores, samples.len()))
        });

        let (params, scores, training_windows) =
            match tokio::time::timeout(self.config.timeout(), handle).await {
                Ok(Ok(trained)) => trained?,
                Ok(Err(join)) => return Err(TrainingError::Task(join.to_string())),
                Err(_) => {
                    task_cancel.cancel();
                    return Err(TrainingError::Timeout(self.config.timeout_secs));
                }
            };

        if task_cancel.is_cancelled() {
            return Err(TrainingError::Cancelled);
        }

        let threshold = self.threshold_from(scores);
        let version = self.next_version(series);
        let model = Model::new(
            series.clone(),
            version,
            self.clock.now(),
            training_windows,
            threshold,
            params,
        );

        Ok(self.store.put(series, model))
    }

    fn settle(
        &self,
        series: SeriesKey,
        outcome: TrainingResult<Arc<Model>>,
        report: &mut SweepReport,
    ) {
        let has_model = self.store.latest(&series).is_some();
        let mut entry = self.entries.entry(series.clone()).or_default();

        match outcome {
            Ok(model) => {
                report.trained += 1;
                entry.state = ModelState::Active;
                entry.failure_streak = 0;
                entry.degraded = false;
                entry.last_error = None;
                entry.last_trained_at = Some(model.trained_at);
                entry.highest_version = Some(model.version);
            }
            Err(e) if e.is_deferral() => {
                report.deferred += 1;
                entry.state = if has_model {
                    ModelState::Stale
                } else {
                    ModelState::Untrained
                };
                debug!(series = %series, error = %e, "Training deferred");
            }
            Err(e) => {
                report.failed += 1;
                entry.state = ModelState::Stale;
                entry.failure_streak += 1;
                entry.last_error = Some(e.to_string());
                warn!(
                    series = %series,
                    error = %e,
                    streak = entry.failure_streak,
                    "Training failed, keeping previous model"
                );

                if entry.failure_streak >= self.config.failure_streak_limit && !entry.degraded {
                    entry.degraded = true;
                    error!(
                        series = %series,
                        streak = entry.failure_streak,
                        "Series degraded after repeated training failures"
                    );
                    let health = self.snapshot(&series, &entry);
                    drop(entry);
                    report.degraded.push(series);
                    self.publish(PipelineEvent::Degraded(health));
                }
            }
        }
    }

    fn refresh_threshold(&self, series: &SeriesKey) -> bool {
        let scores = self.store.trailing_scores(series);
        if scores.len() < self.config.min_threshold_samples {
            return false;
        }
        let Some(current) = self.store.latest(series) else {
            return false;
        };

        let threshold = self.threshold_from(scores);
        if (threshold - current.threshold).abs() < f64::EPSILON {
            return false;
        }
        self.store.update_threshold(series, threshold).is_ok()
    }

    fn threshold_from(&self, mut scores: Vec<f64>) -> f64 {
        scores.retain(|s| s.is_finite());
        scores.sort_by(f64::total_cmp);
        let quantile = if scores.is_empty() {
            self.config.threshold_floor
        } else {
            percentile(&scores, self.config.threshold_quantile)
        };
        quantile.clamp(self.config.threshold_floor, 1.0)
    }

    fn next_version(&self, series: &SeriesKey) -> ModelVersion {
        let stored = self.store.latest(series).map(|m| m.version);
        let tracked = self.entries.get(series).and_then(|e| e.highest_version);
        stored
            .max(tracked)
            .map(ModelVersion::next)
            .unwrap_or(ModelVersion(1))
    }

    fn set_state(&self, series: &SeriesKey, state: ModelState) {
        self.entries.entry(series.clone()).or_default().state = state;
    }

    fn snapshot(&self, series: &SeriesKey, entry: &SeriesEntry) -> SeriesHealth {
        SeriesHealth {
            series: series.clone(),
            state: entry.state,
            active_version: self.store.latest(series).map(|m| m.version),
            failure_streak: entry.failure_streak,
            degraded: entry.degraded,
            last_error: entry.last_error.clone(),
            last_trained_at: entry.last_trained_at,
        }
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(PipelineEventEnvelope::new(event));
        }
    }
}
