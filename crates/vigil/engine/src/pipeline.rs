//! The per-series pipeline: buffer, extract, score, alert.
//!
//! Sealed windows of one series are processed strictly in order under that
//! series' async lock. Different series never share a lock on this path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use vigil_types::{
    AlertEvent, AlertId, PipelineEvent, PipelineEventEnvelope, Record, ScoreResult, SeriesHealth,
    SeriesKey, Window,
};

use crate::alerts::AlertEmitter;
use crate::buffer::{IngestOutcome, WindowBuffer};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::detector::build_detector;
use crate::error::{AlertResult, VigilResult};
use crate::features;
use crate::history::{HistoryStore, InMemoryHistory};
use crate::retrain::{RetrainingScheduler, SweepReport};
use crate::scorer::{AnomalyScorer, BaselineState};
use crate::store::ModelStore;

struct SeriesState {
    baseline: BaselineState,
}

/// Wires the components together for every series.
pub struct Pipeline {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    buffer: WindowBuffer,
    store: Arc<ModelStore>,
    scorer: AnomalyScorer,
    history: Arc<dyn HistoryStore>,
    emitter: AlertEmitter,
    scheduler: RetrainingScheduler,
    series: DashMap<SeriesKey, Arc<Mutex<SeriesState>>>,
    events: broadcast::Sender<PipelineEventEnvelope>,
}

impl Pipeline {
    /// Pipeline with an in-memory history store.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let history = Arc::new(InMemoryHistory::new(config.training.max_training_windows));
        Self::with_history(config, clock, history)
    }

    pub fn with_history(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.executor.event_capacity.max(1));
        let store = Arc::new(ModelStore::new(config.training.clone()));
        let detector = build_detector(
            config.scoring.detector,
            &config.scoring,
            config.training.batch_size,
        );
        let scheduler = RetrainingScheduler::new(
            config.training.clone(),
            store.clone(),
            history.clone(),
            detector,
            clock.clone(),
        )
        .with_events(events.clone());

        Self {
            buffer: WindowBuffer::new(config.window.clone(), clock.clone()),
            scorer: AnomalyScorer::new(config.scoring.clone(), clock.clone()),
            emitter: AlertEmitter::new(config.alerting.clone(), clock.clone()),
            store,
            history,
            scheduler,
            series: DashMap::new(),
            events,
            clock,
            config,
        }
    }

    /// Accept one record, scoring any window it caused to seal.
    pub async fn ingest(&self, record: Record) -> VigilResult<Vec<ScoreResult>> {
        let series = record.series.clone();
        self.store.register(&series);

        match self.buffer.ingest(record)? {
            IngestOutcome::Buffered => Ok(Vec::new()),
            IngestOutcome::Sealed(_) => Ok(self.process_pending(&series).await),
        }
    }

    /// Close the open window of `series` at `boundary` and score it.
    pub async fn seal(&self, series: &SeriesKey, boundary: DateTime<Utc>) -> Vec<ScoreResult> {
        if self.buffer.seal(series, boundary).is_none() {
            return Vec::new();
        }
        self.process_pending(series).await
    }

    /// Seal and score every window due at the clock's current time.
    pub async fn seal_due(&self) -> Vec<ScoreResult> {
        let mut results = Vec::new();
        for series in self.seal_due_series() {
            results.extend(self.process_pending(&series).await);
        }
        results
    }

    /// Seal due windows without scoring them; returns the series to process.
    pub fn seal_due_series(&self) -> Vec<SeriesKey> {
        self.buffer.seal_due(self.clock.now())
    }

    /// Retire idle series, scoring whatever they still had buffered.
    pub async fn retire_idle(&self) -> Vec<SeriesKey> {
        let retired = self.buffer.retire_idle(self.clock.now());
        for series in &retired {
            self.process_pending(series).await;
        }
        retired
    }

    /// Score every sealed window of `series` that has not been processed yet.
    pub async fn process_pending(&self, series: &SeriesKey) -> Vec<ScoreResult> {
        let state = self.series_state(series);
        let mut state = state.lock().await;

        let mut results = Vec::new();
        while let Some(window) = self.buffer.take_sealed(series) {
            results.push(self.process_window(&mut state, window).await);
        }
        results
    }

    async fn process_window(&self, state: &mut SeriesState, window: Window) -> ScoreResult {
        let vector = features::extract(&window);
        drop(window);

        let series = &vector.series;
        let model = self.store.get_active(series).ok();
        let result = self.scorer.score(&vector, model.as_deref(), &state.baseline);

        if model.is_some() && result.used_baseline() {
            self.store.mark_stale(series);
        }

        state.baseline.observe(&vector);
        if !result.used_baseline() {
            self.store.observe_score(series, result.score);
        }

        debug!(
            series = %series,
            window = %result.window_id,
            score = result.score,
            anomalous = result.decision,
            baseline = result.used_baseline(),
            "Window scored"
        );

        if let Err(e) = self.history.append(vector).await {
            warn!(series = %result.series, error = %e, "Failed to record window history");
        }

        self.publish(PipelineEvent::Score(result.clone()));
        if let Some(event) = self.emitter.handle(&result) {
            self.publish(PipelineEvent::Alert(event));
        }

        result
    }

    /// Run one retraining sweep over every known series.
    pub async fn run_sweep(&self) -> SweepReport {
        self.scheduler.run_sweep().await
    }

    pub fn acknowledge(&self, id: AlertId) -> AlertResult<AlertEvent> {
        let event = self.emitter.acknowledge(id)?;
        self.publish(PipelineEvent::Alert(event.clone()));
        Ok(event)
    }

    /// Egress stream of scores, alert transitions and health changes.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEventEnvelope> {
        self.events.subscribe()
    }

    pub fn health(&self) -> Vec<SeriesHealth> {
        self.scheduler.health_all()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffer(&self) -> &WindowBuffer {
        &self.buffer
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &RetrainingScheduler {
        &self.scheduler
    }

    pub fn emitter(&self) -> &AlertEmitter {
        &self.emitter
    }

    fn series_state(&self, series: &SeriesKey) -> Arc<Mutex<SeriesState>> {
        if let Some(state) = self.series.get(series) {
            return state.value().clone();
        }
        self.series
            .entry(series.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SeriesState {
                    baseline: self.scorer.new_baseline(series),
                }))
            })
            .value()
            .clone()
    }

    fn publish(&self, event: PipelineEvent) {
        // Sending only fails without subscribers
        let _ = self.events.send(PipelineEventEnvelope::new(event));
    }
}
