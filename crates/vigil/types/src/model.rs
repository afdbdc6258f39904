//! Trained scoring models.
//!
//! A model is immutable once built. Its checksum covers every field, so a
//! model restored from an external snapshot can be verified before use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{SeriesKey, FEATURE_LEN};

/// Monotonic per-series model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelVersion(pub u64);

impl ModelVersion {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Scoring algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Median / MAD robust z-score, max over features
    RobustZScore,
    /// Mean / standard deviation per feature, averaged
    GaussianEnsemble,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::RobustZScore => write!(f, "robust_z_score"),
            DetectorKind::GaussianEnsemble => write!(f, "gaussian_ensemble"),
        }
    }
}

/// Learned parameters, one variant per detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelParams {
    RobustZScore {
        centers: [f64; FEATURE_LEN],
        spreads: [f64; FEATURE_LEN],
        scale: f64,
    },
    GaussianEnsemble {
        means: [f64; FEATURE_LEN],
        std_devs: [f64; FEATURE_LEN],
        scale: f64,
    },
}

impl ModelParams {
    pub fn kind(&self) -> DetectorKind {
        match self {
            ModelParams::RobustZScore { .. } => DetectorKind::RobustZScore,
            ModelParams::GaussianEnsemble { .. } => DetectorKind::GaussianEnsemble,
        }
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        let (tag, a, b, scale) = match self {
            ModelParams::RobustZScore {
                centers,
                spreads,
                scale,
            } => (0u8, centers, spreads, scale),
            ModelParams::GaussianEnsemble {
                means,
                std_devs,
                scale,
            } => (1u8, means, std_devs, scale),
        };
        hasher.update(&[tag]);
        for v in a.iter().chain(b.iter()) {
            hasher.update(&v.to_le_bytes());
        }
        hasher.update(&scale.to_le_bytes());
    }
}

/// A trained model for one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub series: SeriesKey,
    pub version: ModelVersion,
    pub trained_at: DateTime<Utc>,

    /// Number of windows the model was trained on
    pub training_windows: usize,

    /// Decision threshold on the normalized score
    pub threshold: f64,

    pub params: ModelParams,

    /// Hex BLAKE3 digest over all other fields
    pub checksum: String,
}

impl Model {
    /// Build a model and seal its checksum.
    pub fn new(
        series: SeriesKey,
        version: ModelVersion,
        trained_at: DateTime<Utc>,
        training_windows: usize,
        threshold: f64,
        params: ModelParams,
    ) -> Self {
        let mut model = Self {
            series,
            version,
            trained_at,
            training_windows,
            threshold,
            params,
            checksum: String::new(),
        };
        model.checksum = model.compute_checksum();
        model
    }

    /// Copy of this model with a new decision threshold, same version.
    pub fn with_threshold(&self, threshold: f64) -> Self {
        Self::new(
            self.series.clone(),
            self.version,
            self.trained_at,
            self.training_windows,
            threshold,
            self.params.clone(),
        )
    }

    pub fn kind(&self) -> DetectorKind {
        self.params.kind()
    }

    pub fn compute_checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.series.to_string().as_bytes());
        hasher.update(&self.version.0.to_le_bytes());
        hasher.update(&self.trained_at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(&(self.training_windows as u64).to_le_bytes());
        hasher.update(&self.threshold.to_le_bytes());
        self.params.hash_into(&mut hasher);
        hasher.finalize().to_hex().to_string()
    }

    /// True when the stored checksum matches the contents.
    pub fn verify(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}
