//! Shared runtime for the collector core: matrix data model, task
//! scheduling, plugin pipeline, exporter contract and the
//! AbstractCollector state machine.

pub mod collector;
pub mod config;
pub mod defaults;
pub mod errors;
pub mod exporter;
pub mod matrix;
pub mod plugin;
pub mod schedule;

pub use collector::{AbstractCollector, Collector, CollectorStatus, PollDiagnostics};
pub use errors::{ClassifiedError, ErrorClass};
pub use exporter::{Exporter, ExporterStatus};
pub use matrix::{Instance, Matrix, Metric, MetricType};
pub use plugin::Plugin;
pub use schedule::Schedule;

/// Result type alias used at the orchestrator boundary; components below
/// the poller return `Result<_, ClassifiedError>` directly so their
/// error's class survives.
pub type Result<T> = anyhow::Result<T>;

/// Errors that cross the poller/config boundary, where the class
/// taxonomy of `errors::ErrorClass` doesn't apply (e.g. I/O, TOML
/// parsing).
#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    #[error("validation error: {0}")]
    Validation(String),
}
