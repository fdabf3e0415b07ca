//! HTTP middleware.
//!
//! - Request logging with latency tracking
//! - Bearer-token authentication for the longevity endpoints

pub mod auth;
pub mod logging;

pub use auth::{require_bearer, AuthError, BearerAuth};
pub use logging::request_logging;
