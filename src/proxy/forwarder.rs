// ────────────────────────────────
// src/proxy/forwarder.rs
// Outbound HTTP call from the gateway to one backend
// ────────────────────────────────

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::{Body, HeaderMap, Response, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use super::registry::{display_name, BackendRegistry};
use super::request::ProxiedRequest;
use crate::response;

/// Backend reply, passed through to the client unchanged.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send `request` to the backend registered under `service`.
    ///
    /// Any HTTP status is a success; only transport failures are errors.
    async fn forward(
        &self,
        service: &str,
        request: ProxiedRequest,
    ) -> Result<BackendResponse, ProxyError>;
}

/// Method-agnostic forwarder built on a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpForwarder {
    registry: BackendRegistry,
    client: Client,
}

impl HttpForwarder {
    pub fn new(registry: BackendRegistry, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            // Relay backend redirects to the client instead of following them.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create forwarding HTTP client")?;

        Ok(Self { registry, client })
    }

    pub fn target_url(base_url: &url::Url, path: &str) -> String {
        format!("{}/{}", base_url.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        service: &str,
        request: ProxiedRequest,
    ) -> Result<BackendResponse, ProxyError> {
        let base_url = self
            .registry
            .resolve(service)
            .ok_or_else(|| ProxyError::UnknownService(service.to_string()))?;

        let url = Self::target_url(base_url, &request.path);
        debug!(%service, method = %request.method, %url, "Forwarding request");

        let mut outbound = self
            .client
            .request(request.method, &url)
            .headers(request.headers);
        if let Some(body) = request.json_body {
            outbound = outbound.body(body);
        }

        let unavailable = |e: reqwest::Error| {
            warn!(%service, %url, error = %e, "Backend request failed");
            ProxyError::BackendUnavailable {
                service: service.to_string(),
                details: e.to_string(),
            }
        };

        let reply = outbound.send().await.map_err(unavailable)?;
        let status = reply.status();
        let headers = reply.headers().clone();
        let body = reply.bytes().await.map_err(unavailable)?;

        debug!(%service, status = status.as_u16(), bytes = body.len(), "Backend responded");

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{service} backend unavailable: {details}")]
    BackendUnavailable { service: String, details: String },

    #[error("malformed request body: {0}")]
    MalformedInput(String),

    #[error("no backend registered for service {0}")]
    UnknownService(String),
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::BackendUnavailable { service, details } => response::error(
                StatusCode::SERVICE_UNAVAILABLE,
                &format!("{} service unavailable", display_name(&service)),
                Some(&details),
            ),
            ProxyError::MalformedInput(details) => response::error(
                StatusCode::BAD_REQUEST,
                "Malformed request body",
                Some(&details),
            ),
            ProxyError::UnknownService(service) => response::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unknown service",
                Some(&service),
            ),
        }
    }
}
