//! # Vigil Engine - Anomaly Detection and Scoring Pipeline
//!
//! Turns time-indexed observability records into scored windows and
//! deduplicated alerts.
//!
//! ## Flow
//!
//! ```text
//! Record ─► WindowBuffer ─► extract ─► AnomalyScorer ─► AlertEmitter ─► events
//!                                          ▲
//!            HistoryStore ─► RetrainingScheduler ─► ModelStore
//! ```
//!
//! ## Key Components
//!
//! - [`WindowBuffer`]: per-series fixed-length windows with a grace period
//!   for late records
//! - [`extract`](features::extract): pure feature extraction from one window
//! - [`ModelStore`]: versioned, checksummed models swapped atomically
//! - [`AnomalyScorer`]: model scoring with a bootstrap baseline fallback
//! - [`RetrainingScheduler`]: the `run_sweep` driven model lifecycle
//! - [`AlertEmitter`]: one active alert per series, cool-down to resolve
//! - [`Pipeline`]: wires the above for every series
//! - [`ShardedExecutor`]: worker pool with series sharded by key
//! - [`LogIngress`]: log lines to count records via event templates, with
//!   recurring unknown shapes promoted by [`TemplateMiner`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use vigil_engine::{EngineConfig, Pipeline, SystemClock};
//! use vigil_types::{Record, SeriesKey};
//!
//! # async fn example() -> vigil_engine::VigilResult<()> {
//! let pipeline = Pipeline::new(EngineConfig::default(), Arc::new(SystemClock));
//! let mut events = pipeline.subscribe();
//!
//! let key = SeriesKey::new("cpu.load").with_tag("host", "web-1");
//! pipeline.ingest(Record::new(key, Utc::now(), 0.42)).await?;
//!
//! // On a timer:
//! pipeline.seal_due().await;
//! pipeline.run_sweep().await;
//!
//! while let Ok(envelope) = events.try_recv() {
//!     println!("{:?}", envelope.event);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod alerts;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod executor;
pub mod features;
pub mod history;
pub mod logs;
pub mod pipeline;
pub mod retrain;
pub mod scorer;
pub mod store;

// Re-export main types
pub use alerts::AlertEmitter;
pub use buffer::{IngestOutcome, WindowBuffer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AlertingConfig, EngineConfig, ExecutorConfig, LogIngressConfig, ScoringConfig,
    TrainingConfig, WindowConfig,
};
pub use detector::{build_detector, CancellationFlag, Detector, GaussianEnsemble, RobustZScore};
pub use error::{
    AlertError, AlertResult, ConfigError, HistoryError, HistoryResult, IngestError,
    IngestResult, LogError, LogResult, ModelStoreError, ModelStoreResult, TrainingError,
    TrainingResult, VigilError, VigilResult,
};
pub use executor::ShardedExecutor;
pub use features::extract;
pub use history::{HistoryStore, InMemoryHistory};
pub use logs::{
    EventTemplate, LogIngress, LogLine, LogNormalizer, MinedShape, TemplateMatcher, TemplateMiner,
};
pub use pipeline::Pipeline;
pub use retrain::{RetrainingScheduler, SweepReport};
pub use scorer::{AnomalyScorer, BaselineState};
pub use store::{ModelStore, StaleReason};
