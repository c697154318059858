//! Observability module
//!
//! Structured `tracing` events and `metrics` counters shared by every
//! component. Subscriber and exporter installation belongs to the binary.

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
