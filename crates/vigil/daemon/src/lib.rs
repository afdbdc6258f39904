//! Vigil Daemon library
//!
//! This module provides the components of the `vigild` binary:
//! - Layered configuration loading
//! - NDJSON ingress of metrics, log lines and acknowledgements
//! - The server loop driving sealing, retraining sweeps and event egress

pub mod config;
pub mod error;
pub mod ingress;
pub mod server;

pub use config::{IngressConfig, LoggingConfig, TimerConfig, VigilConfig};
pub use error::{DaemonError, DaemonResult};
pub use ingress::IngressLine;
pub use server::{EventWriter, IngressStats, Server};
