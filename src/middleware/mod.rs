//! Request interceptors wrapped around the gateway endpoints.
//!
//! Every interceptor has the same `(request, next) -> response` shape. A
//! [`Pipeline`] keeps its interceptors sorted by [`Stage`], so the effective
//! order is always auth -> rate limit -> telemetry -> endpoint no matter in
//! which order they were added.

mod auth;
mod rate_limit;
mod telemetry;

pub use auth::{AuthError, AuthMiddleware, Claims, JwtAuthenticator};
pub use rate_limit::{FixedWindowRateLimiter, RateLimitMiddleware, RateLimiter};
pub use telemetry::TelemetryMiddleware;

use async_trait::async_trait;
use hyper::{Body, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;

/// Peer address of the connection a request arrived on, set by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Auth,
    RateLimit,
    Telemetry,
}

/// Terminal request handler at the end of a pipeline.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, req: Request<Body>) -> Response<Body>;
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn stage(&self) -> Stage;

    async fn handle(&self, req: Request<Body>, next: Next<'_>) -> Response<Body>;
}

/// The remainder of a pipeline, handed to each interceptor.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub async fn run(self, req: Request<Body>) -> Response<Body> {
        match self.chain.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    chain: rest,
                    endpoint: self.endpoint,
                };
                current.handle(req, next).await
            }
            None => self.endpoint.call(req).await,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    middleware: Vec<Arc<dyn Middleware>>,
    endpoint: Arc<dyn Endpoint>,
}

impl Pipeline {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            middleware: Vec::new(),
            endpoint,
        }
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        // Stable sort: interceptors of the same stage keep insertion order.
        self.middleware.sort_by_key(|m| m.stage());
        self
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.middleware.iter().map(|m| m.stage()).collect()
    }

    pub async fn run(&self, req: Request<Body>) -> Response<Body> {
        Next {
            chain: &self.middleware,
            endpoint: self.endpoint.as_ref(),
        }
        .run(req)
        .await
    }
}
