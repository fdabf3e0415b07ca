//! Bearer Token Middleware
//!
//! Guards the longevity endpoints with a single shared token compared for
//! equality. There are no users, scopes or expiry.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::debug;

/// The configured token, shared across requests.
#[derive(Clone)]
pub struct BearerAuth {
    token: Arc<str>,
}

impl BearerAuth {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Check a raw `Authorization` header value.
    pub fn verify(&self, header_value: Option<&str>) -> Result<(), AuthError> {
        let raw = header_value.ok_or(AuthError::MissingHeader)?;
        let (scheme, token) = raw
            .trim()
            .split_once(' ')
            .ok_or(AuthError::InvalidFormat)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::InvalidScheme);
        }
        if token.trim() != &*self.token {
            return Err(AuthError::InvalidToken);
        }
        Ok(())
    }
}

/// Reject requests that do not carry the configured bearer token.
pub async fn require_bearer(
    State(auth): State<BearerAuth>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header_value = match req.headers().get(header::AUTHORIZATION) {
        None => None,
        Some(v) => Some(v.to_str().map_err(|_| AuthError::InvalidFormat)?),
    };

    if let Err(e) = auth.verify(header_value) {
        debug!(path = %req.uri().path(), reason = e.message(), "Rejected unauthenticated request");
        return Err(e);
    }

    Ok(next.run(req).await)
}

/// Auth error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingHeader,
    InvalidFormat,
    InvalidScheme,
    InvalidToken,
}

impl AuthError {
    pub fn message(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "Authorization header missing",
            AuthError::InvalidFormat => "Invalid authorization header format",
            AuthError::InvalidScheme => "Invalid authentication scheme",
            AuthError::InvalidToken => "Invalid token",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "detail": self.message() }));
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            body,
        )
            .into_response()
    }
}
