// src/health/mod.rs
mod aggregator;

pub use aggregator::{BackendStatus, HealthAggregator, HealthEndpoint, HealthReport, HealthSnapshot};
