//! Longevity API Endpoints
//!
//! Thin HTTP adapter over [`LongevityService`]. Handlers decode the request,
//! run the blocking service call on the blocking pool and map
//! [`ServiceError::kind`] to a status code. Every error body is
//! `{ "detail": "..." }`.
//!
//! # Endpoints
//!
//! - `GET /` - Service information
//! - `GET /health` - Liveness
//! - `POST /api/longevity/analyze` - Analyze JSON rows
//! - `POST /api/longevity/analyze/csv` - Analyze an uploaded CSV (`file` field)
//! - `GET /api/longevity/report/:run_id?format=json|html` - Release a report
//! - `POST /api/longevity/deploy` - Two-key deployment

use crate::longevity::metrics::{LdropMetrics, RaScoreDeltas};
use crate::longevity::pipeline::DEFAULT_MODE;
use crate::longevity::{
    AnalysisOutcome, DeployRequest, DeploymentRecord, ErrorKind, LongevityService, RawRow,
    ReportDocument, RunId, ServiceError, TargetSource,
};
use crate::middleware::{require_bearer, BearerAuth};
use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::JsonRejection,
        Path, Query, State,
    },
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Multipart field carrying the CSV upload.
pub const CSV_FIELD: &str = "file";

/// Shared state for the longevity API.
pub struct LongevityApiState {
    pub service: Arc<LongevityService>,
}

// =============================================================================
// RESPONSE HELPERS
// =============================================================================

/// Create an error response with proper status code.
fn error_response(status: StatusCode, detail: &str) -> Response {
    let body = serde_json::json!({ "detail": detail });
    (status, Json(body)).into_response()
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Integrity => StatusCode::FORBIDDEN,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn service_error_response(e: ServiceError) -> Response {
    let status = status_for(e.kind());
    if status.is_server_error() {
        error!("Longevity request failed: {}", e);
    } else {
        debug!(status = status.as_u16(), "Longevity request rejected: {}", e);
    }
    error_response(status, &e.detail())
}

/// Run a blocking service call off the async executor.
async fn run_blocking<T, F>(state: &Arc<LongevityApiState>, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&LongevityService) -> Result<T, ServiceError> + Send + 'static,
{
    let service = state.service.clone();
    match tokio::task::spawn_blocking(move || f(&service)).await {
        Ok(result) => result.map_err(service_error_response),
        Err(e) => {
            error!("Blocking task failed: {}", e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal worker failure",
            ))
        }
    }
}

// =============================================================================
// INFO
// =============================================================================

/// GET / - Service information
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "RA Longevity MLOps API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "analyze": "POST /api/longevity/analyze",
            "analyze_csv": "POST /api/longevity/analyze/csv",
            "report": "GET /api/longevity/report/{run_id}",
            "deploy": "POST /api/longevity/deploy"
        }
    }))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// =============================================================================
// ANALYZE
// =============================================================================

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub data: Vec<RawRow>,
    #[serde(default = "default_mode")]
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct ModeQuery {
    #[serde(default = "default_mode")]
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub predictions: Vec<f64>,
    pub ldrop_metrics: LdropMetrics,
    pub ra_score_deltas: RaScoreDeltas,
    pub target_source: TargetSource,
    /// Outcome of the integrity lock evaluated for this run.
    pub integrity_check: bool,
}

impl From<AnalysisOutcome> for AnalyzeResponse {
    fn from(outcome: AnalysisOutcome) -> Self {
        let results = outcome.results;
        Self {
            run_id: results.run_id,
            timestamp: results.timestamp,
            predictions: results.predictions,
            ldrop_metrics: results.ldrop_metrics,
            ra_score_deltas: results.ra_score_deltas,
            target_source: results.target_source,
            integrity_check: outcome.verdict.passed(),
        }
    }
}

/// POST /api/longevity/analyze - Analyze JSON rows
pub async fn analyze(
    State(state): State<Arc<LongevityApiState>>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid request body: {}", e.body_text()),
            )
        }
    };

    match run_blocking(&state, move |svc| svc.analyze(request.data, &request.mode)).await {
        Ok(outcome) => Json(AnalyzeResponse::from(outcome)).into_response(),
        Err(response) => response,
    }
}

/// POST /api/longevity/analyze/csv - Analyze an uploaded CSV file
pub async fn analyze_csv(
    State(state): State<Arc<LongevityApiState>>,
    Query(query): Query<ModeQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Failed to parse CSV: {}", e.body_text()),
            )
        }
    };

    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some(CSV_FIELD) {
                    continue;
                }
                match field.bytes().await {
                    Ok(bytes) => upload = Some(bytes),
                    Err(e) => {
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            &format!("Failed to parse CSV: {}", e.body_text()),
                        )
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("Failed to parse CSV: {}", e.body_text()),
                )
            }
        }
    }

    let Some(bytes) = upload else {
        warn!("CSV upload without a '{}' field", CSV_FIELD);
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Failed to parse CSV: missing '{}' field", CSV_FIELD),
        );
    };

    let mode = query.mode;
    match run_blocking(&state, move |svc| svc.analyze_csv(&bytes, &mode)).await {
        Ok(outcome) => Json(AnalyzeResponse::from(outcome)).into_response(),
        Err(response) => response,
    }
}

// =============================================================================
// REPORT
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
}

/// GET /api/longevity/report/:run_id - Release a stored report
pub async fn get_report(
    State(state): State<Arc<LongevityApiState>>,
    Path(run_id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Response {
    let format = query.format.unwrap_or_else(|| "json".to_string());
    match run_blocking(&state, move |svc| svc.get_report(&run_id, &format)).await {
        Ok(ReportDocument::Json(value)) => Json(value).into_response(),
        Ok(ReportDocument::Html(html)) => Html(html).into_response(),
        Err(response) => response,
    }
}

// =============================================================================
// DEPLOY
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    pub status: String,
    pub message: String,
    pub run_id: RunId,
    pub model_name: String,
    pub deployed_at: DateTime<Utc>,
    pub bundle_path: String,
}

impl From<DeploymentRecord> for DeployResponse {
    fn from(record: DeploymentRecord) -> Self {
        Self {
            status: "success".to_string(),
            message: format!("Model {} deployed successfully", record.model_name),
            bundle_path: format!("/artifacts/{}/bundle.zip", record.run_id),
            run_id: record.run_id,
            model_name: record.model_name,
            deployed_at: record.deployed_at,
        }
    }
}

/// POST /api/longevity/deploy - Deploy a run through the two-key gate
pub async fn deploy(
    State(state): State<Arc<LongevityApiState>>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid request body: {}", e.body_text()),
            )
        }
    };

    match run_blocking(&state, move |svc| svc.deploy(&request)).await {
        Ok(record) => Json(DeployResponse::from(record)).into_response(),
        Err(response) => response,
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// Create the longevity router: public info routes plus the bearer-protected
/// analysis, report and deploy routes.
pub fn longevity_router(state: Arc<LongevityApiState>, auth: BearerAuth) -> Router {
    let protected = Router::new()
        .route("/api/longevity/analyze", post(analyze))
        .route("/api/longevity/analyze/csv", post(analyze_csv))
        .route("/api/longevity/report/:run_id", get(get_report))
        .route("/api/longevity/deploy", post(deploy))
        .route_layer(middleware::from_fn_with_state(auth, require_bearer))
        .with_state(state);

    let public = Router::new()
        .route("/", get(root))
        .route("/health", get(health));

    Router::new().merge(public).merge(protected)
}
