//! # Monitoring
//!
//! Lifecycle events and per-endpoint latency/error aggregation for
//! requests made through the PCO SDK.

pub mod events;
pub mod metrics;

pub use events::{Event, EventEmitter, EventType, ListenerId};
pub use metrics::{normalize_endpoint, EndpointMetrics, MetricsCollector, MetricsSnapshot};
