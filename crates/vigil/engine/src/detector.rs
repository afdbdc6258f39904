//! Scoring algorithms behind the [`Detector`] capability trait.
//!
//! A detector learns [`ModelParams`] from a batch of feature vectors and
//! later scores single vectors against them. Scores lie in `[0, 1]` via
//! `d / (d + scale)` where `d` is a non-negative distance from learned
//! normal behaviour, so they are monotonic in that distance. A non-finite
//! distance scores exactly 1.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vigil_types::{DetectorKind, FeatureVector, ModelParams, FEATURE_LEN};

use crate::config::ScoringConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::features::percentile;

/// Consistency constant turning a MAD into a normal-equivalent std deviation.
const MAD_SCALE: f64 = 1.4826;

/// Absolute floor on any learned spread.
const MIN_SPREAD: f64 = 1e-6;

/// Cooperative cancellation checked by training between batches.
///
/// A child flag also reports cancelled when its parent is.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    own: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            own: Arc::new(AtomicBool::new(false)),
            parent: Some(self.own.clone()),
        }
    }

    pub fn cancel(&self) {
        self.own.store(true, Ordering::SeqCst);
    }

    /// Clear this flag (the parent is untouched).
    pub fn reset(&self) {
        self.own.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.own.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::SeqCst))
    }
}

/// A scoring algorithm.
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    /// Learn parameters from non-empty feature vectors.
    fn train(
        &self,
        samples: &[FeatureVector],
        cancel: &CancellationFlag,
    ) -> TrainingResult<ModelParams>;

    /// Score one vector. `None` when `params` belong to another detector.
    fn score(&self, params: &ModelParams, vector: &FeatureVector) -> Option<f64>;
}

/// Build the detector of the given kind.
pub fn build_detector(
    kind: DetectorKind,
    scoring: &ScoringConfig,
    batch_size: usize,
) -> Arc<dyn Detector> {
    match kind {
        DetectorKind::RobustZScore => Arc::new(RobustZScore {
            scale: scoring.score_scale,
            spread_floor_ratio: scoring.spread_floor_ratio,
            batch_size,
        }),
        DetectorKind::GaussianEnsemble => Arc::new(GaussianEnsemble {
            scale: scoring.score_scale,
            spread_floor_ratio: scoring.spread_floor_ratio,
            batch_size,
        }),
    }
}

/// Median / MAD per feature; distance is the largest robust z-score.
#[derive(Debug, Clone)]
pub struct RobustZScore {
    pub scale: f64,
    pub spread_floor_ratio: f64,
    pub batch_size: usize,
}

impl Detector for RobustZScore {
    fn kind(&self) -> DetectorKind {
        DetectorKind::RobustZScore
    }

    fn train(
        &self,
        samples: &[FeatureVector],
        cancel: &CancellationFlag,
    ) -> TrainingResult<ModelParams> {
        let columns = sorted_columns(samples, self.batch_size, cancel)?;

        let mut centers = [0.0; FEATURE_LEN];
        let mut spreads = [0.0; FEATURE_LEN];
        for (i, column) in columns.iter().enumerate() {
            let median = percentile(column, 0.5);
            let mut deviations: Vec<f64> = column.iter().map(|v| (v - median).abs()).collect();
            deviations.sort_by(f64::total_cmp);
            let mad = percentile(&deviations, 0.5) * MAD_SCALE;

            centers[i] = median;
            spreads[i] = floor_spread(mad, median, self.spread_floor_ratio);
        }

        check_finite(&centers, &spreads, self.scale)?;
        Ok(ModelParams::RobustZScore {
            centers,
            spreads,
            scale: self.scale,
        })
    }

    fn score(&self, params: &ModelParams, vector: &FeatureVector) -> Option<f64> {
        let ModelParams::RobustZScore {
            centers,
            spreads,
            scale,
        } = params
        else {
            return None;
        };

        let distance = (0..FEATURE_LEN)
            .map(|i| z(vector.values[i], centers[i], spreads[i]))
            .fold(0.0, f64::max);
        Some(bounded(distance, *scale))
    }
}

/// Independent Gaussian per feature; the score is the ensemble average of
/// per-feature bounded scores.
#[derive(Debug, Clone)]
pub struct GaussianEnsemble {
    pub scale: f64,
    pub spread_floor_ratio: f64,
    pub batch_size: usize,
}

impl Detector for GaussianEnsemble {
    fn kind(&self) -> DetectorKind {
        DetectorKind::GaussianEnsemble
    }

    fn train(
        &self,
        samples: &[FeatureVector],
        cancel: &CancellationFlag,
    ) -> TrainingResult<ModelParams> {
        let columns = sorted_columns(samples, self.batch_size, cancel)?;

        let mut means = [0.0; FEATURE_LEN];
        let mut std_devs = [0.0; FEATURE_LEN];
        for (i, column) in columns.iter().enumerate() {
            let n = column.len() as f64;
            let mean = column.iter().sum::<f64>() / n;
            let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

            means[i] = mean;
            std_devs[i] = floor_spread(variance.sqrt(), mean, self.spread_floor_ratio);
        }

        check_finite(&means, &std_devs, self.scale)?;
        Ok(ModelParams::GaussianEnsemble {
            means,
            std_devs,
            scale: self.scale,
        })
    }

    fn score(&self, params: &ModelParams, vector: &FeatureVector) -> Option<f64> {
        let ModelParams::GaussianEnsemble {
            means,
            std_devs,
            scale,
        } = params
        else {
            return None;
        };

        let total: f64 = (0..FEATURE_LEN)
            .map(|i| bounded(z(vector.values[i], means[i], std_devs[i]), *scale))
            .sum();
        Some(total / FEATURE_LEN as f64)
    }
}

fn z(value: f64, center: f64, spread: f64) -> f64 {
    let d = ((value - center) / spread).abs();
    if d.is_finite() {
        d
    } else {
        f64::MAX
    }
}

fn bounded(distance: f64, scale: f64) -> f64 {
    if !distance.is_finite() || distance >= f64::MAX {
        return 1.0;
    }
    distance / (distance + scale)
}

fn floor_spread(spread: f64, center: f64, ratio: f64) -> f64 {
    spread.max(ratio * center.abs()).max(MIN_SPREAD)
}

/// Transpose samples into one ascending column per feature, checking for
/// cancellation between batches and rejecting degenerate inputs.
fn sorted_columns(
    samples: &[FeatureVector],
    batch_size: usize,
    cancel: &CancellationFlag,
) -> TrainingResult<Vec<Vec<f64>>> {
    let distinct: HashSet<[u64; FEATURE_LEN]> = samples
        .iter()
        .map(|fv| fv.values.map(f64::to_bits))
        .collect();
    if distinct.len() < 2 {
        return Err(TrainingError::InsufficientDistinct {
            distinct: distinct.len(),
            total: samples.len(),
        });
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(samples.len()); FEATURE_LEN];
    for batch in samples.chunks(batch_size.max(1)) {
        if cancel.is_cancelled() {
            return Err(TrainingError::Cancelled);
        }
        for fv in batch {
            for (column, value) in columns.iter_mut().zip(fv.values.iter()) {
                if !value.is_finite() {
                    return Err(TrainingError::NumericalInstability(format!(
                        "non-finite feature in window {}",
                        fv.window_id
                    )));
                }
                column.push(*value);
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(TrainingError::Cancelled);
    }
    for column in &mut columns {
        column.sort_by(f64::total_cmp);
    }
    Ok(columns)
}

fn check_finite(
    centers: &[f64; FEATURE_LEN],
    spreads: &[f64; FEATURE_LEN],
    scale: f64,
) -> TrainingResult<()> {
    if let Some(i) = (0..FEATURE_LEN).find(|&i| !centers[i].is_finite() || !spreads[i].is_finite())
    {
        return Err(TrainingError::NumericalInstability(format!(
            "feature {} produced a non-finite parameter",
            vigil_types::Feature::ALL[i].name()
        )));
    }
    if !(scale.is_finite() && scale > 0.0) {
        return Err(TrainingError::NumericalInstability(format!(
            "score scale {scale} is not a positive finite number"
        )));
    }
    Ok(())
}
