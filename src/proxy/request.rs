// src/proxy/request.rs
use bytes::Bytes;
use hyper::header::{self, HeaderMap};
use hyper::Method;

use super::ProxyError;

/// Response headers that describe a single connection and must not be relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// One inbound call, reduced to what gets forwarded to a backend.
#[derive(Debug, Clone)]
pub struct ProxiedRequest {
    pub method: Method,
    /// Remainder after the route prefix, including any query string.
    pub path: String,
    pub headers: HeaderMap,
    pub json_body: Option<Bytes>,
}

impl ProxiedRequest {
    /// Only JSON bodies are forwarded; they must decode, and are then sent
    /// byte-for-byte so any inbound `Content-Length` stays accurate.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Self, ProxyError> {
        let json_body = if is_json(headers) && !body.is_empty() {
            serde_json::from_slice::<serde_json::Value>(&body)
                .map_err(|e| ProxyError::MalformedInput(e.to_string()))?;
            Some(body)
        } else {
            None
        };

        Ok(Self {
            method,
            path: path.into(),
            headers: outbound_headers(headers, json_body.is_some()),
            json_body,
        })
    }
}

/// `application/json` or any `application/*+json` media type.
pub fn is_json(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime == "application/json"
        || (mime.starts_with("application/") && mime.ends_with("+json"))
}

/// Copy inbound headers for the backend call.
///
/// `Host` is always dropped so the backend sees its own authority. Framing
/// headers are dropped as well when no body is forwarded.
pub fn outbound_headers(inbound: &HeaderMap, has_body: bool) -> HeaderMap {
    let mut headers = inbound.clone();
    headers.remove(header::HOST);
    if !has_body {
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::TRANSFER_ENCODING);
    }
    headers
}

/// Backend response headers safe to relay to the client. Hyper recomputes
/// the body length itself.
pub fn relayed_response_headers(backend: &HeaderMap) -> HeaderMap {
    let mut headers = backend.clone();
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    headers.remove(header::CONTENT_LENGTH);
    headers
}
