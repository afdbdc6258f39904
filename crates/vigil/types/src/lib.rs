//! Vigil Types - Core data model for the anomaly detection pipeline
//!
//! Vigil turns time-indexed observability records into statistically scored
//! windows and, from those, into deduplicated alerts.
//!
//! ## Key Concepts
//!
//! - **SeriesKey**: metric name plus tag set identifying one stream
//! - **Record**: a single timestamped observation on a series
//! - **Window**: the sealed, time-ordered records of one series in `[start, end)`
//! - **FeatureVector**: fixed-length numeric summary of one window
//! - **Model**: versioned, checksummed scoring parameters for one series
//! - **ScoreResult**: the immutable outcome of scoring one window
//! - **Alert**: an OPEN / ACKNOWLEDGED / RESOLVED incident on a series
//! - **Events**: the egress stream of scores and alert transitions

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod alert;
pub mod events;
pub mod features;
pub mod health;
pub mod model;
pub mod record;
pub mod score;
pub mod series;
pub mod window;

// Re-export main types
pub use alert::{Alert, AlertEvent, AlertEventKind, AlertId, AlertState};
pub use events::{PipelineEvent, PipelineEventEnvelope};
pub use features::{Feature, FeatureVector, FEATURE_LEN};
pub use health::{ModelState, SeriesHealth};
pub use model::{DetectorKind, Model, ModelParams, ModelVersion};
pub use record::Record;
pub use score::ScoreResult;
pub use series::{SeriesKey, SeriesKeyError};
pub use window::{Window, WindowId};
