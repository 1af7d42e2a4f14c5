// src/metrics/mod.rs
mod collector;
mod telemetry;

pub use collector::{MetricsCollector, MetricsRegistry};
pub use telemetry::{MetricsEndpoint, Outcome, ServiceMetrics, Telemetry};
