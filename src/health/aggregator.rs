// src/health/aggregator.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use hyper::{Body, Request, Response, StatusCode};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;
use crate::middleware::Endpoint;
use crate::proxy::{BackendDescriptor, BackendRegistry, HttpForwarder};
use crate::response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Healthy,
    Unhealthy,
    Unavailable,
}

impl BackendStatus {
    fn gauge_value(self) -> i64 {
        match self {
            BackendStatus::Healthy => 2,
            BackendStatus::Unhealthy => 1,
            BackendStatus::Unavailable => 0,
        }
    }
}

/// Service name -> probe result, recomputed on every call.
pub type HealthSnapshot = BTreeMap<String, BackendStatus>;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub gateway: BackendStatus,
    pub services: HealthSnapshot,
}

pub struct HealthAggregator {
    registry: BackendRegistry,
    client: Client,
    timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl HealthAggregator {
    pub fn new(
        registry: BackendRegistry,
        timeout: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create health check HTTP client")?;

        Ok(Self {
            registry,
            client,
            timeout,
            metrics,
        })
    }

    /// Probe every backend concurrently. A failing backend never affects the
    /// others.
    pub async fn aggregate(&self) -> HealthSnapshot {
        let probes = self.registry.all().iter().map(|backend| async move {
            (backend.name.clone(), self.probe(backend).await)
        });
        let snapshot: HealthSnapshot = futures::future::join_all(probes).await.into_iter().collect();

        let healthy = snapshot
            .values()
            .filter(|s| **s == BackendStatus::Healthy)
            .count();
        info!("Health check complete: {}/{} backends healthy", healthy, snapshot.len());

        snapshot
    }

    pub async fn report(&self) -> HealthReport {
        HealthReport {
            // Reaching this code is the gateway's own liveness signal.
            gateway: BackendStatus::Healthy,
            services: self.aggregate().await,
        }
    }

    async fn probe(&self, backend: &BackendDescriptor) -> BackendStatus {
        let start = Instant::now();
        let url = HttpForwarder::target_url(&backend.base_url, "health");

        let status = match timeout(self.timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => BackendStatus::Healthy,
            Ok(Ok(response)) => {
                warn!(backend = %backend.name, status = %response.status(), "Backend is unhealthy");
                BackendStatus::Unhealthy
            }
            Ok(Err(e)) => {
                warn!(backend = %backend.name, error = %e, "Backend health probe failed");
                BackendStatus::Unavailable
            }
            Err(_) => {
                warn!(backend = %backend.name, "Backend health probe timed out");
                BackendStatus::Unavailable
            }
        };

        debug!(
            backend = %backend.name,
            ?status,
            response_time_ms = start.elapsed().as_millis() as u64,
            "Health probe finished"
        );

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.name, status.gauge_value());
        }

        status
    }
}

/// `GET /health`
pub struct HealthEndpoint {
    aggregator: Arc<HealthAggregator>,
}

impl HealthEndpoint {
    pub fn new(aggregator: Arc<HealthAggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl Endpoint for HealthEndpoint {
    async fn call(&self, _req: Request<Body>) -> Response<Body> {
        response::json(StatusCode::OK, &self.aggregator.report().await)
    }
}
