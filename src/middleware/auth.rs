// src/middleware/auth.rs
use async_trait::async_trait;
use hyper::header::AUTHORIZATION;
use hyper::{Body, Request, Response, StatusCode};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{Middleware, Next, Stage};
use crate::response;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject as issued; the user service uses numeric ids.
    #[serde(default)]
    pub sub: Option<serde_json::Value>,
    pub exp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header is missing")]
    MissingToken,

    #[error("Authorization header must use the Bearer scheme")]
    InvalidScheme,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// HS256 bearer token verification with the shared `JWT_SECRET_KEY`.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }

    pub fn verify_request(&self, req: &Request<Body>) -> Result<Claims, AuthError> {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingToken)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidScheme)?;
        self.verify(token.trim())
    }
}

pub struct AuthMiddleware {
    authenticator: Arc<JwtAuthenticator>,
}

impl AuthMiddleware {
    pub fn new(authenticator: Arc<JwtAuthenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn stage(&self) -> Stage {
        Stage::Auth
    }

    async fn handle(&self, mut req: Request<Body>, next: Next<'_>) -> Response<Body> {
        match self.authenticator.verify_request(&req) {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
                next.run(req).await
            }
            Err(e) => {
                tracing::warn!(path = %req.uri().path(), error = %e, "Rejected unauthenticated request");
                response::error(StatusCode::UNAUTHORIZED, "Unauthorized", Some(&e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn token(secret: &str, exp_offset: i64) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let claims = Claims {
            sub: Some(serde_json::json!(1)),
            exp: (now + exp_offset) as u64,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_valid_token() {
        let auth = JwtAuthenticator::new("secret");
        let claims = auth.verify(&token("secret", 3600)).unwrap();
        assert_eq!(claims.sub, Some(serde_json::json!(1)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = JwtAuthenticator::new("secret");
        assert!(matches!(
            auth.verify(&token("other", 3600)),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = JwtAuthenticator::new("secret");
        assert!(matches!(auth.verify(&token("secret", -3600)), Err(AuthError::Expired)));
    }

    #[test]
    fn test_request_header_parsing() {
        let auth = JwtAuthenticator::new("secret");

        let missing = Request::new(Body::empty());
        assert!(matches!(auth.verify_request(&missing), Err(AuthError::MissingToken)));

        let basic = Request::builder()
            .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(auth.verify_request(&basic), Err(AuthError::InvalidScheme)));

        let bearer = Request::builder()
            .header(AUTHORIZATION, format!("Bearer {}", token("secret", 60)))
            .body(Body::empty())
            .unwrap();
        assert!(auth.verify_request(&bearer).is_ok());
    }
}
