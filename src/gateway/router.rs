// src/gateway/router.rs
use hyper::{Body, Method, Request, Response, Uri};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::route::RouteHandler;
use crate::cache::CacheStore;
use crate::config::RateLimitConfig;
use crate::health::{HealthAggregator, HealthEndpoint};
use crate::metrics::{MetricsEndpoint, Telemetry};
use crate::middleware::{
    AuthMiddleware, JwtAuthenticator, Pipeline, RateLimitMiddleware, RateLimiter,
    TelemetryMiddleware,
};
use crate::proxy::{BackendRegistry, Forwarder};
use crate::response;

/// Path below `prefix`, with the query string re-attached.
///
/// `/users/users/1?full=1` under `/users` gives `users/1?full=1`. The prefix
/// alone, or the prefix followed only by `/`, has no remainder.
pub fn route_remainder(prefix: &str, uri: &Uri) -> Option<String> {
    let rest = uri.path().strip_prefix(prefix)?.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    Some(match uri.query() {
        Some(query) => format!("{}?{}", rest, query),
        None => rest.to_string(),
    })
}

fn is_routed_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::POST | Method::PUT | Method::DELETE
    )
}

/// Everything the gateway is assembled from. Built once in `main`.
pub struct GatewayContext {
    pub registry: BackendRegistry,
    pub cache: Arc<dyn CacheStore>,
    pub forwarder: Arc<dyn Forwarder>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub telemetry: Arc<Telemetry>,
    pub authenticator: Arc<JwtAuthenticator>,
    pub health: Arc<HealthAggregator>,
    pub cache_ttl: Duration,
    pub rate_limit: RateLimitConfig,
}

struct ServiceRoute {
    prefix: String,
    pipeline: Pipeline,
}

/// Top-level dispatch:
///
/// - `GET /health`, no interceptors
/// - `GET /metrics`, auth
/// - `/<service prefix>/<path>`, rate limit then telemetry then the route handler
pub struct Gateway {
    routes: Vec<ServiceRoute>,
    health: Pipeline,
    metrics: Pipeline,
}

impl Gateway {
    pub fn new(ctx: GatewayContext) -> Self {
        let routes = ctx
            .registry
            .all()
            .iter()
            .map(|backend| {
                let service_id = backend.service_id();
                let handler = RouteHandler::new(
                    backend.clone(),
                    ctx.cache.clone(),
                    ctx.forwarder.clone(),
                    ctx.cache_ttl,
                );
                let pipeline = Pipeline::new(Arc::new(handler))
                    .with(Arc::new(RateLimitMiddleware::new(
                        ctx.rate_limiter.clone(),
                        service_id.clone(),
                        &ctx.rate_limit,
                    )))
                    .with(Arc::new(TelemetryMiddleware::new(
                        ctx.telemetry.clone(),
                        service_id,
                    )));

                ServiceRoute {
                    prefix: backend.route_prefix.clone(),
                    pipeline,
                }
            })
            .collect();

        let service_ids = ctx.registry.all().iter().map(|b| b.service_id()).collect();
        let metrics = Pipeline::new(Arc::new(MetricsEndpoint::new(ctx.telemetry.clone(), service_ids)))
            .with(Arc::new(AuthMiddleware::new(ctx.authenticator.clone())));

        let health = Pipeline::new(Arc::new(HealthEndpoint::new(ctx.health.clone())));

        Self {
            routes,
            health,
            metrics,
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let path = req.uri().path();
        if path == "/health" || path == "/metrics" {
            if req.method() != Method::GET {
                return response::method_not_allowed();
            }
            let pipeline = if path == "/health" {
                &self.health
            } else {
                &self.metrics
            };
            return pipeline.run(req).await;
        }

        let Some(route) = self
            .routes
            .iter()
            .find(|route| route_remainder(&route.prefix, req.uri()).is_some())
        else {
            debug!(path = %req.uri().path(), "No route matched");
            return response::not_found();
        };

        if !is_routed_method(req.method()) {
            return response::method_not_allowed();
        }

        route.pipeline.run(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(raw: &str) -> Uri {
        raw.parse().unwrap()
    }

    #[test]
    fn test_route_remainder() {
        assert_eq!(route_remainder("/users", &uri("/users/users/1")), Some("users/1".to_string()));
        assert_eq!(
            route_remainder("/orders", &uri("/orders/list?page=2")),
            Some("list?page=2".to_string())
        );
        assert_eq!(route_remainder("/users", &uri("/users")), None);
        assert_eq!(route_remainder("/users", &uri("/users/")), None);
        assert_eq!(route_remainder("/users", &uri("/usersx/1")), None);
        assert_eq!(route_remainder("/users", &uri("/orders/1")), None);
    }

    #[test]
    fn test_routed_methods() {
        assert!(is_routed_method(&Method::DELETE));
        assert!(!is_routed_method(&Method::PATCH));
    }
}
