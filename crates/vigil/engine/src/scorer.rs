//! Anomaly scoring.
//!
//! With an active model the window is scored by the model's detector. Without
//! one the scorer falls back to a bootstrap baseline: the window mean against
//! the running mean and deviation of recent non-empty window means. Count
//! series (log event counts) track the window's record count instead, empty
//! windows included as zero.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::warn;
use vigil_types::{DetectorKind, Feature, FeatureVector, Model, ScoreResult, SeriesKey};

use crate::clock::Clock;
use crate::config::ScoringConfig;
use crate::detector::{build_detector, Detector};

/// Decision threshold reported for baseline scores; `|z| >= z_threshold`
/// maps exactly to `score >= 0.5`.
pub const BASELINE_THRESHOLD: f64 = 0.5;

/// Rolling values of one feature over the last K windows of one series.
#[derive(Debug, Clone)]
pub struct BaselineState {
    means: VecDeque<f64>,
    capacity: usize,
    feature: Feature,
}

impl BaselineState {
    /// Baseline over window means.
    pub fn new(capacity: usize) -> Self {
        Self::tracking(capacity, Feature::Mean)
    }

    /// Baseline over `feature`; only `Mean` and `Count` are meaningful.
    pub fn tracking(capacity: usize, feature: Feature) -> Self {
        Self {
            means: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            feature,
        }
    }

    pub fn feature(&self) -> Feature {
        self.feature
    }

    /// Record a scored window. Empty windows only count toward a count
    /// baseline, as zero.
    pub fn observe(&mut self, vector: &FeatureVector) {
        let value = vector.get(self.feature);
        if (vector.empty && self.feature != Feature::Count) || !value.is_finite() {
            return;
        }
        if self.means.len() == self.capacity {
            self.means.pop_front();
        }
        self.means.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Population mean and standard deviation of the retained means.
    pub fn stats(&self) -> Option<(f64, f64)> {
        if self.means.is_empty() {
            return None;
        }
        let n = self.means.len() as f64;
        let mean = self.means.iter().sum::<f64>() / n;
        let variance = self.means.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        Some((mean, variance.sqrt()))
    }
}

/// Scores feature vectors against a model or the bootstrap baseline.
pub struct AnomalyScorer {
    config: ScoringConfig,
    detectors: Vec<Arc<dyn Detector>>,
    clock: Arc<dyn Clock>,
}

impl AnomalyScorer {
    pub fn new(config: ScoringConfig, clock: Arc<dyn Clock>) -> Self {
        let detectors = [DetectorKind::RobustZScore, DetectorKind::GaussianEnsemble]
            .into_iter()
            .map(|kind| build_detector(kind, &config, usize::MAX))
            .collect();
        Self {
            config,
            detectors,
            clock,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Fresh baseline for `series`.
    pub fn new_baseline(&self, series: &SeriesKey) -> BaselineState {
        let feature = if self.config.is_count_series(series) {
            Feature::Count
        } else {
            Feature::Mean
        };
        BaselineState::tracking(self.config.baseline_windows, feature)
    }

    /// Score one window.
    pub fn score(
        &self,
        vector: &FeatureVector,
        model: Option<&Model>,
        baseline: &BaselineState,
    ) -> ScoreResult {
        if let Some(model) = model {
            match self.score_with_model(vector, model) {
                Some(result) => return result,
                None => warn!(
                    series = %vector.series,
                    version = %model.version,
                    kind = %model.kind(),
                    "No detector for model, scoring against baseline"
                ),
            }
        }
        self.score_with_baseline(vector, baseline)
    }

    fn score_with_model(&self, vector: &FeatureVector, model: &Model) -> Option<ScoreResult> {
        let detector = self.detectors.iter().find(|d| d.kind() == model.kind())?;
        let score = detector.score(&model.params, vector)?;
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            1.0
        };

        Some(self.result(
            vector,
            score,
            score >= model.threshold,
            model.threshold,
            Some(model),
        ))
    }

    fn score_with_baseline(&self, vector: &FeatureVector, baseline: &BaselineState) -> ScoreResult {
        let stats = baseline
            .stats()
            .filter(|_| baseline.len() >= self.config.baseline_min_windows);

        let Some((mean, std_dev)) = stats else {
            return self.result(vector, 0.0, false, BASELINE_THRESHOLD, None);
        };

        let feature = baseline.feature();
        let mut floor = (self.config.baseline_floor_ratio * mean.abs()).max(1e-6);
        if feature == Feature::Count {
            // Poisson spread of the expected count
            floor = floor.max(mean.abs().sqrt()).max(1.0);
        }
        let z = ((vector.get(feature) - mean) / std_dev.max(floor)).abs();
        let threshold = self.config.baseline_z_threshold;
        let (score, decision) = if z.is_finite() {
            (z / (z + threshold), z >= threshold)
        } else {
            (1.0, true)
        };

        self.result(vector, score, decision, BASELINE_THRESHOLD, None)
    }

    fn result(
        &self,
        vector: &FeatureVector,
        score: f64,
        decision: bool,
        threshold: f64,
        model: Option<&Model>,
    ) -> ScoreResult {
        ScoreResult {
            series: vector.series.clone(),
            window_id: vector.window_id,
            window_start: vector.window_start,
            window_end: vector.window_end,
            score,
            decision,
            threshold,
            model_version: model.map(|m| m.version),
            scored_at: self.clock.now(),
        }
    }
}
