//! Observability for the MQTT event sink
//!
//! Structured logging initialisation and per-sink metrics.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_logging, parse_level, raise_level, LogFormat, LogSettings};
pub use metrics::{SinkMetrics, SinkMetricsSnapshot};

// Span macros for structured logging
pub use logging::{connection_span, publish_span};
