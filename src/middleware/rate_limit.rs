// src/middleware/rate_limit.rs
use async_trait::async_trait;
use dashmap::DashMap;
use hyper::{Body, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{ClientAddr, Middleware, Next, Stage};
use crate::config::RateLimitConfig;
use crate::response;

pub trait RateLimiter: Send + Sync {
    /// Count one request for `client`, returning false once `max_requests`
    /// have been seen within the current window.
    fn allow(&self, client: &str, max_requests: u32, window: Duration) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counters held in process memory.
#[derive(Debug, Default)]
pub struct FixedWindowRateLimiter {
    windows: DashMap<String, Window>,
}

impl FixedWindowRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget clients whose window ended, returning how many were dropped.
    pub fn purge_idle(&self, window: Duration) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn allow(&self, client: &str, max_requests: u32, window: Duration) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= max_requests {
            return false;
        }
        entry.count += 1;
        true
    }
}

/// Rejects requests over the limit with 429 before any cache or backend work.
pub struct RateLimitMiddleware {
    limiter: Arc<dyn RateLimiter>,
    scope: String,
    max_requests: u32,
    window: Duration,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<dyn RateLimiter>, scope: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            limiter,
            scope: scope.into(),
            max_requests: config.max_requests,
            window: config.window(),
        }
    }

    fn client_key(&self, req: &Request<Body>) -> String {
        let client = req
            .extensions()
            .get::<ClientAddr>()
            .map(|addr| addr.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        format!("{}:{}", self.scope, client)
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn stage(&self) -> Stage {
        Stage::RateLimit
    }

    async fn handle(&self, req: Request<Body>, next: Next<'_>) -> Response<Body> {
        let key = self.client_key(&req);
        if self.limiter.allow(&key, self.max_requests, self.window) {
            return next.run(req).await;
        }

        tracing::warn!(client = %key, "Rate limit exceeded");
        let details = format!(
            "Maximum {} requests per {} seconds",
            self.max_requests,
            self.window.as_secs()
        );
        response::error(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded", Some(&details))
    }
}
