//! Configuration for vigild
//!
//! Layered as: built-in defaults, then an optional file (format by
//! extension), then `VIGIL_`-prefixed environment variables with `__`
//! between nesting levels, e.g. `VIGIL_WINDOW__GRACE_PERIOD_SECS=10`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_engine::config::MAX_DURATION_SECS;
use vigil_engine::{
    AlertingConfig, EngineConfig, ExecutorConfig, LogIngressConfig, ScoringConfig,
    TrainingConfig, WindowConfig,
};

use crate::error::{DaemonError, DaemonResult};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub window: WindowConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub training: TrainingConfig,

    #[serde(default)]
    pub alerting: AlertingConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub logs: LogIngressConfig,

    /// Daemon timers
    #[serde(default)]
    pub timers: TimerConfig,

    /// Input sources
    #[serde(default)]
    pub ingress: IngressConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Intervals of the daemon's own loops. Retraining runs every
/// `training.retrain_interval_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// How often due windows are sealed
    pub seal_interval_ms: u64,

    /// How often idle series are retired
    pub retire_interval_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            seal_interval_ms: 1000,
            retire_interval_secs: 60,
        }
    }
}

impl TimerConfig {
    pub fn seal_interval(&self) -> Duration {
        Duration::from_millis(self.seal_interval_ms.clamp(1, MAX_DURATION_SECS * 1000))
    }

    pub fn retire_interval(&self) -> Duration {
        Duration::from_secs(self.retire_interval_secs.clamp(1, MAX_DURATION_SECS))
    }
}

/// Input configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// NDJSON input file; standard input when unset or `-`
    pub input: Option<PathBuf>,

    /// JSON array of log event templates
    pub templates_file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// JSON format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl VigilConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&str>) -> DaemonResult<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&VigilConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VIGIL")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("logs.levels")
                .try_parsing(true),
        );

        let config: VigilConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Engine view of this configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            window: self.window.clone(),
            scoring: self.scoring.clone(),
            training: self.training.clone(),
            alerting: self.alerting.clone(),
            executor: self.executor.clone(),
            logs: self.logs.clone(),
        }
    }

    pub fn validate(&self) -> DaemonResult<()> {
        self.engine().validate()?;
        if self.timers.seal_interval_ms == 0 {
            return Err(DaemonError::Config(
                "timers.seal_interval_ms must be positive".to_string(),
            ));
        }
        if self.timers.retire_interval_secs > MAX_DURATION_SECS
            || self.timers.seal_interval_ms / 1000 > MAX_DURATION_SECS
        {
            return Err(DaemonError::Config(format!(
                "timer intervals must not exceed {MAX_DURATION_SECS}s"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = VigilConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timers.seal_interval_ms, 1000);
        assert_eq!(config.logging.level, "info");
        assert!(config.ingress.input.is_none());
    }

    #[test]
    fn test_engine_view_carries_sections() {
        let mut config = VigilConfig::default();
        config.window.grace_period_secs = 12;
        config.alerting.cooldown_count = 7;
        let engine = config.engine();
        assert_eq!(engine.window.grace_period_secs, 12);
        assert_eq!(engine.alerting.cooldown_count, 7);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = VigilConfig::load(None).unwrap();
        assert_eq!(config.window.duration_secs, 60);
        assert_eq!(config.training.min_training_windows, 30);
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("vigild-test-{}.toml", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "[window]\nduration_secs = 30\n\n[alerting]\ncooldown_count = 5").unwrap();
        }

        let config = VigilConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.window.duration_secs, 30);
        assert_eq!(config.window.grace_period_secs, 5);
        assert_eq!(config.alerting.cooldown_count, 5);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let path = std::env::temp_dir().join(format!("vigild-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[training]\nthreshold_quantile = 2.0\n").unwrap();

        let result = VigilConfig::load(path.to_str());
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(DaemonError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_rejects_oversized_durations() {
        let path = std::env::temp_dir().join(format!("vigild-long-{}.toml", std::process::id()));
        std::fs::write(&path, "[alerting]\nrenotify_interval_secs = 9999999999999\n").unwrap();

        let result = VigilConfig::load(path.to_str());
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(DaemonError::InvalidConfig(_))));

        let mut config = VigilConfig::default();
        config.timers.retire_interval_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));
    }
}
