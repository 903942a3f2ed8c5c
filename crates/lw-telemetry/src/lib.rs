//! Observability for the live-mode pipeline.
//!
//! - **Logging**: human-readable and JSON output via `tracing-subscriber`
//! - **Metrics**: process-local counters and latency histograms, snapshotted
//!   into the controller status

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{MetricsCollector, MetricsSnapshot};
