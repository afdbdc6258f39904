//! Model store.
//!
//! Owns the active [`Model`] of every series as an `Arc` behind a per-series
//! lock. Installing a model is a single pointer swap, so a scorer holding the
//! previous `Arc` keeps a complete model for the rest of its call.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_types::{Model, ModelVersion, SeriesKey};

use crate::config::TrainingConfig;
use crate::error::{ModelStoreError, ModelStoreResult};

/// Why a series' model needs retraining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// Explicitly marked by an operator or the pipeline
    Marked,
    /// Trained on fewer windows than the configured minimum
    InsufficientTraining,
    /// Older than the maximum model age
    Expired,
    /// Recent scores drifted above the drift threshold
    Drift,
    /// Failed its integrity check
    Corrupt,
}

#[derive(Default)]
struct ModelSlot {
    active: Option<Arc<Model>>,
    /// Previous versions, newest last
    retained: VecDeque<Arc<Model>>,
    marked_stale: bool,
    corrupt: bool,
    drift: f64,
    drift_samples: u64,
    trailing: VecDeque<f64>,
}

impl ModelSlot {
    fn reset_tracking(&mut self) {
        self.marked_stale = false;
        self.corrupt = false;
        self.drift = 0.0;
        self.drift_samples = 0;
        self.trailing.clear();
    }
}

/// Per-series versioned model storage.
pub struct ModelStore {
    config: TrainingConfig,
    slots: DashMap<SeriesKey, Arc<RwLock<ModelSlot>>>,
}

impl ModelStore {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
        }
    }

    /// Make a series known to the retraining sweep. Returns `true` if it was new.
    pub fn register(&self, series: &SeriesKey) -> bool {
        if self.slots.contains_key(series) {
            return false;
        }
        let mut created = false;
        self.slots.entry(series.clone()).or_insert_with(|| {
            created = true;
            Arc::default()
        });
        if created {
            debug!(series = %series, "Registered series with model store");
        }
        created
    }

    pub fn is_registered(&self, series: &SeriesKey) -> bool {
        self.slots.contains_key(series)
    }

    /// Every registered series.
    pub fn series(&self) -> Vec<SeriesKey> {
        self.slots.iter().map(|e| e.key().clone()).collect()
    }

    /// The verified active model of `series`.
    ///
    /// A model failing verification is marked stale and reported as `Corrupt`.
    pub fn get_active(&self, series: &SeriesKey) -> ModelStoreResult<Arc<Model>> {
        let slot = self.slot(series)?;

        let model = slot
            .read()
            .active
            .clone()
            .ok_or_else(|| ModelStoreError::NotFound(series.clone()))?;

        if model.verify() {
            return Ok(model);
        }

        let mut guard = slot.write();
        if !guard.corrupt {
            warn!(
                series = %series,
                version = %model.version,
                "Model failed integrity check, marking stale"
            );
        }
        guard.corrupt = true;
        guard.marked_stale = true;

        Err(ModelStoreError::Corrupt {
            series: series.clone(),
            version: model.version,
        })
    }

    /// The active model without integrity verification.
    pub fn latest(&self, series: &SeriesKey) -> Option<Arc<Model>> {
        self.slots
            .get(series)
            .and_then(|slot| slot.value().read().active.clone())
    }

    /// Install a newly trained model; the previous one is retained for rollback.
    pub fn put(&self, series: &SeriesKey, model: Model) -> Arc<Model> {
        let slot = self.slot_or_register(series);
        let model = Arc::new(model);
        let mut guard = slot.write();
        if let Some(previous) = guard.active.replace(model.clone()) {
            guard.retained.push_back(previous);
            while guard.retained.len() > self.config.retained_versions {
                guard.retained.pop_front();
            }
        }
        guard.reset_tracking();

        info!(
            series = %series,
            version = %model.version,
            threshold = model.threshold,
            training_windows = model.training_windows,
            "Model installed"
        );
        model
    }

    /// Install a model loaded from an external snapshot, as-is.
    ///
    /// The checksum is not re-sealed; a tampered snapshot surfaces as
    /// `Corrupt` on the next `get_active` or `staleness` check.
    pub fn restore(&self, series: &SeriesKey, model: Model) {
        let slot = self.slot_or_register(series);
        let mut guard = slot.write();
        info!(series = %series, version = %model.version, "Model restored");
        guard.active = Some(Arc::new(model));
        guard.reset_tracking();
    }

    /// Reinstate the newest retained version, discarding the active one.
    pub fn rollback(&self, series: &SeriesKey) -> ModelStoreResult<Arc<Model>> {
        let slot = self.slot(series)?;
        let mut guard = slot.write();
        let previous = guard
            .retained
            .pop_back()
            .ok_or_else(|| ModelStoreError::NothingToRollBack(series.clone()))?;

        let discarded = guard.active.replace(previous.clone());
        guard.reset_tracking();

        info!(
            series = %series,
            from = ?discarded.map(|m| m.version),
            to = %previous.version,
            "Model rolled back"
        );
        Ok(previous)
    }

    /// Versions available for rollback, oldest first.
    pub fn retained_versions(&self, series: &SeriesKey) -> Vec<ModelVersion> {
        self.slots
            .get(series)
            .map(|slot| slot.value().read().retained.iter().map(|m| m.version).collect())
            .unwrap_or_default()
    }

    pub fn mark_stale(&self, series: &SeriesKey) {
        if let Some(slot) = self.slots.get(series).map(|s| s.value().clone()) {
            slot.write().marked_stale = true;
            debug!(series = %series, "Model marked stale");
        }
    }

    /// Whether the active model needs retraining, and why.
    ///
    /// `None` for fresh models and for series without a model. The active
    /// model's checksum is verified here too, so an unread corrupt model is
    /// still retrained.
    pub fn staleness(&self, series: &SeriesKey, now: DateTime<Utc>) -> Option<StaleReason> {
        let slot = self.slots.get(series).map(|s| s.value().clone())?;

        let intact = {
            let guard = slot.read();
            guard.corrupt || guard.active.as_ref().map_or(true, |m| m.verify())
        };
        if !intact {
            let mut guard = slot.write();
            if let Some(model) = guard.active.as_ref() {
                warn!(
                    series = %series,
                    version = %model.version,
                    "Model failed integrity check, marking stale"
                );
            }
            guard.corrupt = true;
            guard.marked_stale = true;
        }

        let guard = slot.read();
        if guard.corrupt {
            return Some(StaleReason::Corrupt);
        }
        let model = guard.active.as_ref()?;

        if guard.marked_stale {
            Some(StaleReason::Marked)
        } else if model.training_windows < self.config.min_training_windows {
            Some(StaleReason::InsufficientTraining)
        } else if now - model.trained_at > self.config.max_model_age() {
            Some(StaleReason::Expired)
        } else if guard.drift_samples >= self.config.drift_min_samples
            && guard.drift > self.config.drift_threshold
        {
            Some(StaleReason::Drift)
        } else {
            None
        }
    }

    /// Feed a model-produced score into drift tracking and the trailing buffer.
    pub fn observe_score(&self, series: &SeriesKey, score: f64) {
        let Some(slot) = self.slots.get(series).map(|s| s.value().clone()) else {
            return;
        };
        if !score.is_finite() {
            return;
        }

        let mut guard = slot.write();
        guard.drift = if guard.drift_samples == 0 {
            score
        } else {
            self.config.drift_alpha * score + (1.0 - self.config.drift_alpha) * guard.drift
        };
        guard.drift_samples += 1;

        guard.trailing.push_back(score);
        while guard.trailing.len() > self.config.trailing_scores {
            guard.trailing.pop_front();
        }
    }

    /// Current drift EWMA, once any score has been observed.
    pub fn drift(&self, series: &SeriesKey) -> Option<f64> {
        let slot = self.slots.get(series).map(|s| s.value().clone())?;
        let guard = slot.read();
        (guard.drift_samples > 0).then_some(guard.drift)
    }

    pub fn trailing_scores(&self, series: &SeriesKey) -> Vec<f64> {
        self.slots
            .get(series)
            .map(|slot| slot.value().read().trailing.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Swap in a copy of the active model with a new decision threshold.
    pub fn update_threshold(
        &self,
        series: &SeriesKey,
        threshold: f64,
    ) -> ModelStoreResult<Arc<Model>> {
        let slot = self.slot(series)?;
        let mut guard = slot.write();
        let current = guard
            .active
            .clone()
            .ok_or_else(|| ModelStoreError::NotFound(series.clone()))?;

        let updated = Arc::new(current.with_threshold(threshold));
        guard.active = Some(updated.clone());

        debug!(
            series = %series,
            version = %updated.version,
            from = current.threshold,
            to = threshold,
            "Threshold updated"
        );
        Ok(updated)
    }

    fn slot_or_register(&self, series: &SeriesKey) -> Arc<RwLock<ModelSlot>> {
        self.slots.entry(series.clone()).or_default().value().clone()
    }

    fn slot(&self, series: &SeriesKey) -> ModelStoreResult<Arc<RwLock<ModelSlot>>> {
        self.slots
            .get(series)
            .map(|s| s.value().clone())
            .ok_or_else(|| ModelStoreError::NotFound(series.clone()))
    }
}
