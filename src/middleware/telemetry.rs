// src/middleware/telemetry.rs
use async_trait::async_trait;
use hyper::{Body, Request, Response};
use std::sync::Arc;
use std::time::Instant;

use super::{Middleware, Next, Stage};
use crate::metrics::{Outcome, Telemetry};

/// Records outcome and latency of every request reaching a service route.
pub struct TelemetryMiddleware {
    telemetry: Arc<Telemetry>,
    service: String,
}

impl TelemetryMiddleware {
    pub fn new(telemetry: Arc<Telemetry>, service: impl Into<String>) -> Self {
        Self {
            telemetry,
            service: service.into(),
        }
    }
}

#[async_trait]
impl Middleware for TelemetryMiddleware {
    fn stage(&self) -> Stage {
        Stage::Telemetry
    }

    async fn handle(&self, req: Request<Body>, next: Next<'_>) -> Response<Body> {
        let started = Instant::now();
        let response = next.run(req).await;
        self.telemetry
            .record(&self.service, Outcome::from_response(&response), started.elapsed());
        response
    }
}
