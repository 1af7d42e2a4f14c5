// src/metrics/telemetry.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hyper::{Body, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::MetricsCollector;
use crate::middleware::Endpoint;
use crate::response::{self, X_CACHE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    CacheHit,
    ClientError,
    ServerError,
}

impl Outcome {
    pub fn from_response(response: &Response<Body>) -> Self {
        let status = response.status();
        if status.is_server_error() {
            Outcome::ServerError
        } else if status.is_client_error() {
            Outcome::ClientError
        } else if response
            .headers()
            .get(X_CACHE)
            .map_or(false, |v| v.as_bytes().eq_ignore_ascii_case(b"hit"))
        {
            Outcome::CacheHit
        } else {
            Outcome::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::CacheHit => "cache_hit",
            Outcome::ClientError => "client_error",
            Outcome::ServerError => "server_error",
        }
    }
}

/// Per-service summary served by `GET /metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub cache_hits: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub average_latency_ms: f64,
    pub last_request_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ServiceStats {
    total: u64,
    successes: u64,
    cache_hits: u64,
    client_errors: u64,
    server_errors: u64,
    latency_total: Duration,
    last_request_at: Option<DateTime<Utc>>,
}

/// Request tracking shared by every service route. Recording never fails and
/// never waits on I/O.
#[derive(Default)]
pub struct Telemetry {
    services: DashMap<String, ServiceStats>,
    collector: Option<Arc<MetricsCollector>>,
}

impl Telemetry {
    pub fn new(collector: Option<Arc<MetricsCollector>>) -> Self {
        Self {
            services: DashMap::new(),
            collector,
        }
    }

    pub fn record(&self, service: &str, outcome: Outcome, latency: Duration) {
        {
            let mut stats = self.services.entry(service.to_string()).or_default();
            stats.total += 1;
            stats.latency_total += latency;
            stats.last_request_at = Some(Utc::now());
            match outcome {
                Outcome::Success => stats.successes += 1,
                Outcome::CacheHit => {
                    stats.successes += 1;
                    stats.cache_hits += 1;
                }
                Outcome::ClientError => stats.client_errors += 1,
                Outcome::ServerError => stats.server_errors += 1,
            }
        }

        if let Some(collector) = &self.collector {
            collector.record_request(service, outcome.as_str(), latency);
        }
    }

    pub fn get_service_metrics(&self, service: &str) -> ServiceMetrics {
        let Some(stats) = self.services.get(service) else {
            return ServiceMetrics::default();
        };

        let average_latency_ms = if stats.total == 0 {
            0.0
        } else {
            stats.latency_total.as_secs_f64() * 1000.0 / stats.total as f64
        };

        ServiceMetrics {
            total_requests: stats.total,
            successful_requests: stats.successes,
            cache_hits: stats.cache_hits,
            client_errors: stats.client_errors,
            server_errors: stats.server_errors,
            average_latency_ms,
            last_request_at: stats.last_request_at,
        }
    }
}

/// `GET /metrics`: one summary per service id.
pub struct MetricsEndpoint {
    telemetry: Arc<Telemetry>,
    services: Vec<String>,
}

impl MetricsEndpoint {
    pub fn new(telemetry: Arc<Telemetry>, services: Vec<String>) -> Self {
        Self {
            telemetry,
            services,
        }
    }
}

#[async_trait]
impl Endpoint for MetricsEndpoint {
    async fn call(&self, _req: Request<Body>) -> Response<Body> {
        let summary: serde_json::Map<String, serde_json::Value> = self
            .services
            .iter()
            .map(|service| {
                let metrics = self.telemetry.get_service_metrics(service);
                let value = serde_json::to_value(metrics).unwrap_or(serde_json::Value::Null);
                (service.clone(), value)
            })
            .collect();

        response::json(StatusCode::OK, &summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn response_with(status: StatusCode, cache: Option<&'static str>) -> Response<Body> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        if let Some(value) = cache {
            response.headers_mut().insert(X_CACHE, HeaderValue::from_static(value));
        }
        response
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(Outcome::from_response(&response_with(StatusCode::OK, None)), Outcome::Success);
        assert_eq!(
            Outcome::from_response(&response_with(StatusCode::OK, Some("HIT"))),
            Outcome::CacheHit
        );
        assert_eq!(
            Outcome::from_response(&response_with(StatusCode::TOO_MANY_REQUESTS, None)),
            Outcome::ClientError
        );
        assert_eq!(
            Outcome::from_response(&response_with(StatusCode::SERVICE_UNAVAILABLE, None)),
            Outcome::ServerError
        );
    }

    #[test]
    fn test_record_and_summarise() {
        let telemetry = Telemetry::new(None);
        telemetry.record("order_service", Outcome::Success, Duration::from_millis(10));
        telemetry.record("order_service", Outcome::CacheHit, Duration::from_millis(2));
        telemetry.record("order_service", Outcome::ServerError, Duration::from_millis(30));

        let metrics = telemetry.get_service_metrics("order_service");
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.server_errors, 1);
        assert!((metrics.average_latency_ms - 14.0).abs() < 0.001);
        assert!(metrics.last_request_at.is_some());

        assert_eq!(telemetry.get_service_metrics("user_service"), ServiceMetrics::default());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_lists_every_service() {
        let telemetry = Arc::new(Telemetry::new(None));
        telemetry.record("user_service", Outcome::Success, Duration::from_millis(5));
        let endpoint = MetricsEndpoint::new(
            telemetry,
            vec!["user_service".to_string(), "order_service".to_string()],
        );

        let response = endpoint.call(Request::new(Body::empty())).await;
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["user_service"]["total_requests"], 1);
        assert_eq!(json["order_service"]["total_requests"], 0);
    }
}
