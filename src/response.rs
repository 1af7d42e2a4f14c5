//! JSON response helpers shared by the router, route handlers and middleware.

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};
use serde::Serialize;

pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const APPLICATION_JSON: &str = "application/json";
}

/// Set on service route responses: `HIT` when served from the cache,
/// `MISS` when a cacheable request went to the backend.
pub const X_CACHE: &str = "x-cache";

/// Error payload returned for every failure: `{error, details?}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a str>,
}

pub fn json<T: Serialize>(status: StatusCode, data: &T) -> Response<Body> {
    match serde_json::to_vec(data) {
        Ok(body) => with_content_type(status, Body::from(body), content_type::APPLICATION_JSON),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            with_content_type(
                StatusCode::INTERNAL_SERVER_ERROR,
                Body::from("Internal Server Error"),
                content_type::TEXT_PLAIN,
            )
        }
    }
}

pub fn error(status: StatusCode, error: &str, details: Option<&str>) -> Response<Body> {
    json(status, &ErrorBody { error, details })
}

pub fn not_found() -> Response<Body> {
    error(StatusCode::NOT_FOUND, "Not found", None)
}

pub fn method_not_allowed() -> Response<Body> {
    error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", None)
}

fn with_content_type(status: StatusCode, body: Body, content_type: &'static str) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_omits_missing_details() {
        let response = error(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded", None);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            content_type::APPLICATION_JSON
        );

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], br#"{"error":"Rate limit exceeded"}"#);
    }
}
