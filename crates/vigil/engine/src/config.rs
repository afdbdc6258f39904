//! Engine configuration.
//!
//! Every numeric knob of the pipeline is a named option with a default.
//! Loading from files and the environment is the daemon's job; this module
//! only defines the shape, the defaults and validation.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use vigil_types::{DetectorKind, SeriesKey};

use crate::error::ConfigError;
use crate::logs::{EVENTS_SERIES, UNKNOWN_SERIES};

/// Upper bound for every `*_secs` option (about 100 years).
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 86_400;

/// Seconds as a chrono duration, saturating at [`MAX_DURATION_SECS`].
fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

fn check_secs(field: &'static str, secs: u64) -> Result<(), ConfigError> {
    if secs > MAX_DURATION_SECS {
        return Err(ConfigError::invalid(
            field,
            format!("must not exceed {MAX_DURATION_SECS}"),
        ));
    }
    Ok(())
}

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Windowing configuration
    #[serde(default)]
    pub window: WindowConfig,

    /// Scoring configuration
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Retraining configuration
    #[serde(default)]
    pub training: TrainingConfig,

    /// Alerting configuration
    #[serde(default)]
    pub alerting: AlertingConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Log ingress configuration
    #[serde(default)]
    pub logs: LogIngressConfig,
}

impl EngineConfig {
    /// Check cross-field and range constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        self.scoring.validate()?;
        self.training.validate()?;
        self.alerting.validate()?;
        self.executor.validate()?;
        self.logs.validate()?;
        Ok(())
    }
}

/// Event window buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window length; windows are aligned to multiples of it.
    pub duration_secs: u64,

    /// How far behind the sealed boundary a record may arrive and still be kept.
    pub grace_period_secs: u64,

    /// Records after which a window is sealed early.
    pub max_records: usize,

    /// Timestamps further ahead of the clock than this are clamped to the clock.
    pub max_future_skew_secs: u64,

    /// Idle time after which a series is logically retired.
    pub series_ttl_secs: u64,

    /// Maximum windows one `seal_due` pass seals per series before skipping ahead.
    pub max_catch_up_windows: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            duration_secs: 60,
            grace_period_secs: 5,
            max_records: 10_000,
            max_future_skew_secs: 300,
            series_ttl_secs: 3600,
            max_catch_up_windows: 16,
        }
    }
}

impl WindowConfig {
    pub fn duration(&self) -> Duration {
        seconds(self.duration_secs)
    }

    pub fn grace_period(&self) -> Duration {
        seconds(self.grace_period_secs)
    }

    pub fn max_future_skew(&self) -> Duration {
        seconds(self.max_future_skew_secs)
    }

    pub fn series_ttl(&self) -> Duration {
        seconds(self.series_ttl_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_secs == 0 {
            return Err(ConfigError::invalid("window.duration_secs", "must be positive"));
        }
        check_secs("window.duration_secs", self.duration_secs)?;
        check_secs("window.grace_period_secs", self.grace_period_secs)?;
        check_secs("window.max_future_skew_secs", self.max_future_skew_secs)?;
        check_secs("window.series_ttl_secs", self.series_ttl_secs)?;
        if self.max_records == 0 {
            return Err(ConfigError::invalid("window.max_records", "must be positive"));
        }
        if self.max_catch_up_windows == 0 {
            return Err(ConfigError::invalid(
                "window.max_catch_up_windows",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Anomaly scorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Detector used for training and scoring.
    pub detector: DetectorKind,

    /// Distance at which a model score reaches 0.5.
    pub score_scale: f64,

    /// Per-feature spread floor, relative to the feature's center.
    pub spread_floor_ratio: f64,

    /// Window means kept for the bootstrap baseline (K).
    pub baseline_windows: usize,

    /// Window means required before the baseline decides anything.
    pub baseline_min_windows: usize,

    /// Fixed z-score threshold of the bootstrap baseline.
    pub baseline_z_threshold: f64,

    /// Baseline standard deviation floor, relative to the baseline mean.
    pub baseline_floor_ratio: f64,

    /// Series names whose records are event counts; their baseline tracks
    /// the per-window record count.
    pub count_series: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::RobustZScore,
            score_scale: 3.0,
            spread_floor_ratio: 0.05,
            baseline_windows: 100,
            baseline_min_windows: 10,
            baseline_z_threshold: 4.0,
            baseline_floor_ratio: 0.01,
            count_series: vec![EVENTS_SERIES.to_string(), UNKNOWN_SERIES.to_string()],
        }
    }
}

impl ScoringConfig {
    pub fn is_count_series(&self, series: &SeriesKey) -> bool {
        self.count_series.iter().any(|name| name == series.name())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.score_scale > 0.0) {
            return Err(ConfigError::invalid("scoring.score_scale", "must be positive"));
        }
        if self.spread_floor_ratio < 0.0 {
            return Err(ConfigError::invalid(
                "scoring.spread_floor_ratio",
                "must not be negative",
            ));
        }
        if self.baseline_windows == 0 {
            return Err(ConfigError::invalid(
                "scoring.baseline_windows",
                "must be positive",
            ));
        }
        if self.baseline_min_windows < 2 || self.baseline_min_windows > self.baseline_windows {
            return Err(ConfigError::invalid(
                "scoring.baseline_min_windows",
                format!("must be in 2..={}", self.baseline_windows),
            ));
        }
        if !(self.baseline_z_threshold > 0.0) {
            return Err(ConfigError::invalid(
                "scoring.baseline_z_threshold",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Retraining scheduler and model store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Interval between sweeps (used by the external timer).
    pub retrain_interval_secs: u64,

    /// Minimum non-empty windows a model may be trained from.
    pub min_training_windows: usize,

    /// Windows requested from history per training run (M).
    pub max_training_windows: usize,

    /// Models older than this are stale.
    pub max_model_age_secs: u64,

    /// EWMA of scores above which a model is considered drifted.
    pub drift_threshold: f64,

    /// EWMA smoothing factor.
    pub drift_alpha: f64,

    /// Scores observed before drift is evaluated.
    pub drift_min_samples: u64,

    /// Quantile of scores used as the decision threshold.
    pub threshold_quantile: f64,

    /// Lowest decision threshold ever applied.
    pub threshold_floor: f64,

    /// Trailing scores required before the sweep recomputes a threshold.
    pub min_threshold_samples: usize,

    /// Trailing scores retained per series.
    pub trailing_scores: usize,

    /// Deadline for one training run.
    pub timeout_secs: u64,

    /// Samples processed between cancellation checks.
    pub batch_size: usize,

    /// Training runs in flight per sweep.
    pub max_concurrent: usize,

    /// Consecutive failures after which a series is reported degraded.
    pub failure_streak_limit: u32,

    /// Previous model versions kept for rollback.
    pub retained_versions: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            retrain_interval_secs: 300,
            min_training_windows: 30,
            max_training_windows: 500,
            max_model_age_secs: 86_400,
            drift_threshold: 0.6,
            drift_alpha: 0.1,
            drift_min_samples: 20,
            threshold_quantile: 0.995,
            threshold_floor: 0.5,
            min_threshold_samples: 50,
            trailing_scores: 1000,
            timeout_secs: 30,
            batch_size: 64,
            max_concurrent: 4,
            failure_streak_limit: 3,
            retained_versions: 3,
        }
    }
}

impl TrainingConfig {
    pub fn max_model_age(&self) -> Duration {
        seconds(self.max_model_age_secs)
    }

    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.timeout_secs.min(MAX_DURATION_SECS))
    }

    pub fn retrain_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.retrain_interval_secs.min(MAX_DURATION_SECS))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_training_windows < 2 {
            return Err(ConfigError::invalid(
                "training.min_training_windows",
                "must be at least 2",
            ));
        }
        if self.max_training_windows < self.min_training_windows {
            return Err(ConfigError::invalid(
                "training.max_training_windows",
                "must not be below min_training_windows",
            ));
        }
        if !(self.threshold_quantile > 0.0 && self.threshold_quantile <= 1.0) {
            return Err(ConfigError::invalid(
                "training.threshold_quantile",
                "must be in (0, 1]",
            ));
        }
        if !(0.0..1.0).contains(&self.threshold_floor) {
            return Err(ConfigError::invalid(
                "training.threshold_floor",
                "must be in [0, 1)",
            ));
        }
        if !(self.drift_alpha > 0.0 && self.drift_alpha <= 1.0) {
            return Err(ConfigError::invalid("training.drift_alpha", "must be in (0, 1]"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid("training.timeout_secs", "must be positive"));
        }
        check_secs("training.timeout_secs", self.timeout_secs)?;
        check_secs("training.retrain_interval_secs", self.retrain_interval_secs)?;
        check_secs("training.max_model_age_secs", self.max_model_age_secs)?;
        if self.batch_size == 0 || self.max_concurrent == 0 {
            return Err(ConfigError::invalid(
                "training.batch_size",
                "batch_size and max_concurrent must be positive",
            ));
        }
        if self.trailing_scores < self.min_threshold_samples {
            return Err(ConfigError::invalid(
                "training.trailing_scores",
                "must not be below min_threshold_samples",
            ));
        }
        Ok(())
    }
}

/// Alert emitter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Consecutive non-anomalous results before an alert resolves.
    pub cooldown_count: u32,

    /// Minimum time between notifications for the same active alert.
    pub renotify_interval_secs: u64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            cooldown_count: 3,
            renotify_interval_secs: 3600,
        }
    }
}

impl AlertingConfig {
    pub fn renotify_interval(&self) -> Duration {
        seconds(self.renotify_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cooldown_count == 0 {
            return Err(ConfigError::invalid(
                "alerting.cooldown_count",
                "must be positive",
            ));
        }
        check_secs("alerting.renotify_interval_secs", self.renotify_interval_secs)?;
        Ok(())
    }
}

/// Sharded worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker tasks; series are sharded across them by key.
    pub workers: usize,

    /// Pending dispatches per worker.
    pub queue_depth: usize,

    /// Capacity of the egress event channel.
    pub event_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 1024,
            event_capacity: 4096,
        }
    }
}

impl ExecutorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.queue_depth == 0 || self.event_capacity == 0 {
            return Err(ConfigError::invalid(
                "executor.workers",
                "workers, queue_depth and event_capacity must be positive",
            ));
        }
        Ok(())
    }
}

/// Log ingress configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogIngressConfig {
    /// Levels that are counted; empty counts every level.
    pub levels: Vec<String>,

    /// Promote recurring unmatched line shapes to templates.
    pub mine_templates: bool,

    /// Occurrences of one shape before it becomes a template.
    pub min_template_samples: usize,

    /// Shapes with at least this share of `<*>` tokens are never promoted.
    pub max_wildcard_ratio: f64,

    /// Distinct unpromoted shapes tracked at once.
    pub max_pending_shapes: usize,
}

impl Default for LogIngressConfig {
    fn default() -> Self {
        Self {
            levels: vec!["ERROR".to_string(), "WARN".to_string()],
            mine_templates: true,
            min_template_samples: 2,
            max_wildcard_ratio: 0.8,
            max_pending_shapes: 10_000,
        }
    }
}

impl LogIngressConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_template_samples == 0 {
            return Err(ConfigError::invalid(
                "logs.min_template_samples",
                "must be positive",
            ));
        }
        if !(self.max_wildcard_ratio > 0.0 && self.max_wildcard_ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "logs.max_wildcard_ratio",
                "must be in (0, 1]",
            ));
        }
        Ok(())
    }
}
