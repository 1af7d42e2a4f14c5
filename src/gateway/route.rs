// src/gateway/route.rs
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_ENCODING};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::router::route_remainder;
use crate::cache::CacheStore;
use crate::middleware::Endpoint;
use crate::proxy::{
    relayed_response_headers, BackendDescriptor, BackendResponse, Forwarder, ProxiedRequest,
    ProxyError,
};
use crate::response::{self, X_CACHE};

/// `<service_id>:<path>`, e.g. `user_service:users/42`.
pub fn cache_key(service_id: &str, path: &str) -> String {
    format!("{}:{}", service_id, path)
}

fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|coding| !coding.is_empty() && !coding.eq_ignore_ascii_case("identity"))
}

#[derive(Debug, Serialize)]
struct CachedBody<'a> {
    from_cache: bool,
    data: &'a str,
}

/// Cache-or-forward orchestration for the routes of a single backend.
///
/// Only GET responses are read from and written to the cache. A successful
/// write through any other method drops the cached GET response for the same
/// path. Cache failures are treated as misses.
pub struct RouteHandler {
    backend: BackendDescriptor,
    service_id: String,
    cache: Arc<dyn CacheStore>,
    forwarder: Arc<dyn Forwarder>,
    ttl: Duration,
}

impl RouteHandler {
    pub fn new(
        backend: BackendDescriptor,
        cache: Arc<dyn CacheStore>,
        forwarder: Arc<dyn Forwarder>,
        ttl: Duration,
    ) -> Self {
        Self {
            service_id: backend.service_id(),
            backend,
            cache,
            forwarder,
            ttl,
        }
    }

    async fn lookup(&self, key: &str) -> Option<Bytes> {
        match self.cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(%key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: &str, value: Bytes) {
        if let Err(e) = self.cache.set(key, value, self.ttl).await {
            warn!(%key, error = %e, "Failed to cache backend response");
        }
    }

    async fn invalidate(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            warn!(%key, error = %e, "Failed to invalidate cached response");
        }
    }

    /// Hits are served as text, so only replies sent without a content coding
    /// are stored.
    fn is_storable(reply: &BackendResponse) -> bool {
        reply.status.is_success() && !is_encoded(&reply.headers)
    }

    fn cached_response(cached: &[u8]) -> Response<Body> {
        let data = String::from_utf8_lossy(cached);
        let mut response = response::json(
            StatusCode::OK,
            &CachedBody {
                from_cache: true,
                data: &data,
            },
        );
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("HIT"));
        response
    }

    fn relay(reply: BackendResponse, cacheable: bool) -> Response<Body> {
        let mut response = Response::new(Body::from(reply.body));
        *response.status_mut() = reply.status;
        *response.headers_mut() = relayed_response_headers(&reply.headers);
        if cacheable {
            response
                .headers_mut()
                .insert(X_CACHE, HeaderValue::from_static("MISS"));
        }
        response
    }
}

#[async_trait]
impl Endpoint for RouteHandler {
    async fn call(&self, req: Request<Body>) -> Response<Body> {
        let (parts, body) = req.into_parts();
        let Some(path) = route_remainder(&self.backend.route_prefix, &parts.uri) else {
            return response::not_found();
        };

        let key = cache_key(&self.service_id, &path);
        let cacheable = parts.method == Method::GET;

        if cacheable {
            if let Some(cached) = self.lookup(&key).await {
                debug!(%key, "Cache hit");
                return Self::cached_response(&cached);
            }
            debug!(%key, "Cache miss");
        }

        let body = match hyper::body::to_bytes(body).await {
            Ok(body) => body,
            Err(e) => return ProxyError::MalformedInput(e.to_string()).into(),
        };
        let request = match ProxiedRequest::new(parts.method, path, &parts.headers, body) {
            Ok(request) => request,
            Err(e) => return e.into(),
        };

        match self.forwarder.forward(&self.backend.name, request).await {
            Ok(reply) => {
                if cacheable {
                    if Self::is_storable(&reply) {
                        self.store(&key, reply.body.clone()).await;
                    } else if reply.status.is_success() {
                        debug!(%key, "Encoded backend reply, not caching");
                    }
                } else if reply.status.is_success() {
                    self.invalidate(&key).await;
                }
                Self::relay(reply, cacheable)
            }
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCacheStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use url::Url;

    /// Scripted backend that counts calls and remembers the last request.
    struct FakeForwarder {
        calls: AtomicUsize,
        status: StatusCode,
        headers: HeaderMap,
        body: &'static [u8],
        fail: bool,
        last: Mutex<Option<ProxiedRequest>>,
    }

    impl FakeForwarder {
        fn replying(status: StatusCode, body: &'static str) -> Arc<Self> {
            Self::replying_with(status, HeaderMap::new(), body.as_bytes())
        }

        fn replying_with(status: StatusCode, headers: HeaderMap, body: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                status,
                headers,
                body,
                fail: false,
                last: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: b"",
                fail: true,
                last: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Forwarder for FakeForwarder {
        async fn forward(
            &self,
            service: &str,
            request: ProxiedRequest,
        ) -> Result<BackendResponse, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request);
            if self.fail {
                return Err(ProxyError::BackendUnavailable {
                    service: service.to_string(),
                    details: "connection refused".to_string(),
                });
            }
            Ok(BackendResponse {
                status: self.status,
                headers: self.headers.clone(),
                body: Bytes::from_static(self.body),
            })
        }
    }

    /// Store whose every operation fails.
    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
            Err(CacheError::Backend("connection reset".to_string()))
        }

        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection reset".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection reset".to_string()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn handler(
        name: &str,
        cache: Arc<dyn CacheStore>,
        forwarder: Arc<dyn Forwarder>,
    ) -> RouteHandler {
        let backend = BackendDescriptor::new(
            name,
            format!("/{}s", name),
            Url::parse("http://backend.invalid").unwrap(),
        );
        RouteHandler::new(backend, cache, forwarder, Duration::from_secs(60))
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response<Body>) -> serde_json::Value {
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_miss_forwards_once_and_caches() {
        let cache = Arc::new(MemoryCacheStore::new());
        let backend = FakeForwarder::replying(StatusCode::OK, r#"{"id":1}"#);
        let route = handler("user", cache.clone(), backend.clone());

        let response = route.call(request(Method::GET, "/users/users/1")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(X_CACHE).unwrap(), "MISS");
        assert_eq!(backend.calls(), 1);
        assert_eq!(
            cache.get("user_service:users/1").await.unwrap(),
            Some(Bytes::from_static(br#"{"id":1}"#))
        );
    }

    #[tokio::test]
    async fn test_hit_skips_backend() {
        let cache = Arc::new(MemoryCacheStore::new());
        cache
            .set(
                "product_service:items",
                Bytes::from_static(b"[1,2]"),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let backend = FakeForwarder::replying(StatusCode::OK, "unused");
        let route = handler("product", cache, backend.clone());

        let response = route.call(request(Method::GET, "/products/items")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(X_CACHE).unwrap(), "HIT");
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"from_cache": true, "data": "[1,2]"})
        );
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_write_methods_bypass_cache_and_invalidate() {
        let cache = Arc::new(MemoryCacheStore::new());
        cache
            .set("order_service:7", Bytes::from_static(b"stale"), Duration::from_secs(60))
            .await
            .unwrap();
        let backend = FakeForwarder::replying(StatusCode::OK, r#"{"updated":true}"#);
        let route = handler("order", cache.clone(), backend.clone());

        let response = route.call(request(Method::PUT, "/orders/7")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_CACHE).is_none());
        assert_eq!(backend.calls(), 1);
        assert!(cache.get("order_service:7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_status_is_relayed_but_not_cached() {
        let cache = Arc::new(MemoryCacheStore::new());
        let backend = FakeForwarder::replying(StatusCode::NOT_FOUND, r#"{"error":"User not found"}"#);
        let route = handler("user", cache.clone(), backend.clone());

        let response = route.call(request(Method::GET, "/users/users/99")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "User not found");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_503() {
        let cache = Arc::new(MemoryCacheStore::new());
        let route = handler("order", cache.clone(), FakeForwarder::failing());

        let response = route.call(request(Method::GET, "/orders/1")).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "Order service unavailable", "details": "connection refused"})
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_broken_cache_fails_open() {
        let backend = FakeForwarder::replying(StatusCode::OK, r#"{"ok":true}"#);
        let route = handler("user", Arc::new(BrokenCache), backend.clone());

        let response = route.call(request(Method::GET, "/users/users/1")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_query_string_is_part_of_path() {
        let cache = Arc::new(MemoryCacheStore::new());
        let backend = FakeForwarder::replying(StatusCode::OK, "[]");
        let route = handler("product", cache.clone(), backend.clone());

        route.call(request(Method::GET, "/products/search?q=lamp")).await;

        let forwarded = backend.last.lock().unwrap().clone().unwrap();
        assert_eq!(forwarded.path, "search?q=lamp");
        assert!(cache.get("product_service:search?q=lamp").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_malformed_json_body_is_rejected() {
        let backend = FakeForwarder::replying(StatusCode::OK, "{}");
        let route = handler("user", Arc::new(MemoryCacheStore::new()), backend.clone());

        let req = Request::builder()
            .method(Method::POST)
            .uri("/users/register")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = route.call(req).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_compressed_reply_is_relayed_but_not_cached() {
        // gzip of `{"id":1}`
        const GZIPPED: &[u8] = &[
            0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0xab, 0x56, 0xca, 0x4c,
            0x51, 0xb2, 0x32, 0xac, 0x05, 0x00, 0xc5, 0xf8, 0x5d, 0x44, 0x08, 0x00, 0x00, 0x00,
        ];
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let cache = Arc::new(MemoryCacheStore::new());
        let backend = FakeForwarder::replying_with(StatusCode::OK, headers, GZIPPED);
        let route = handler("user", cache.clone(), backend.clone());

        for _ in 0..2 {
            let req = Request::builder()
                .uri("/users/users/1")
                .header("accept-encoding", "gzip")
                .body(Body::empty())
                .unwrap();
            let response = route.call(req).await;

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers().get(X_CACHE).unwrap(), "MISS");
            assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
            let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
            assert_eq!(&body[..], GZIPPED);
        }

        assert_eq!(backend.calls(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_identity_coding_is_not_encoded() {
        let mut headers = HeaderMap::new();
        assert!(!is_encoded(&headers));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("identity"));
        assert!(!is_encoded(&headers));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
        assert!(is_encoded(&headers));
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key("user_service", "users/1"), "user_service:users/1");
    }
}
