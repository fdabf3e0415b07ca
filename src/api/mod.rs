//! HTTP adapter.

pub mod longevity;

pub use longevity::{longevity_router, LongevityApiState};

use crate::config::AppConfig;
use crate::longevity::LongevityService;
use crate::middleware::{request_logging, BearerAuth};
use axum::{extract::DefaultBodyLimit, middleware, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Assemble the full application router with its layers.
pub fn build_app(service: Arc<LongevityService>, config: &AppConfig) -> Router {
    let state = Arc::new(LongevityApiState { service });
    let auth = BearerAuth::new(config.api_bearer_token.as_str());

    longevity_router(state, auth)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
