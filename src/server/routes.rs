// Detection endpoints.
//
// Both entry points take a gate slot before doing anything else. Rejected
// requests get an immediate 503. Admitted requests run the pipeline on the
// blocking pool; the permit moves into that task so the slot is held until
// the work actually finishes, even if the client has gone away.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;

use super::AppState;
use crate::detection::source::ClipRequest;
use crate::detection::{DetectionError, FeatureReport};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub in_flight: usize,
    pub capacity: usize,
}

/// HTTP error variants mapped to JSON responses.
#[derive(Debug)]
pub enum ApiError {
    Detection(DetectionError),
    Internal(String),
}

impl From<DetectionError> for ApiError {
    fn from(err: DetectionError) -> Self {
        ApiError::Detection(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Detection(err @ DetectionError::Overloaded) => {
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ApiError::Detection(err @ DetectionError::SourceUnavailable { .. }) => {
                (StatusCode::BAD_GATEWAY, err.to_string())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/by-search-term/{term}", get(by_search_term))
        .route("/by-url/{url}", get(by_url))
        .route("/health", get(health))
}

async fn by_search_term(
    State(state): State<AppState>,
    Path(term): Path<String>,
) -> Result<Json<FeatureReport>, ApiError> {
    run_detection(state, ClipRequest::SearchTerm(term)).await
}

async fn by_url(
    State(state): State<AppState>,
    Path(url): Path<String>,
) -> Result<Json<FeatureReport>, ApiError> {
    run_detection(state, ClipRequest::Url(url)).await
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let gate = state.detector.gate();
    Json(HealthResponse {
        status: "ok",
        in_flight: gate.in_flight(),
        capacity: gate.capacity(),
    })
}

async fn run_detection(
    state: AppState,
    request: ClipRequest,
) -> Result<Json<FeatureReport>, ApiError> {
    let permit = state.detector.admit()?;
    let detector = Arc::clone(&state.detector);

    let report = tokio::task::spawn_blocking(move || detector.run(permit, &request))
        .await
        .map_err(|e| {
            log::error!("Detection task failed: {}", e);
            ApiError::Internal("detection task failed".to_string())
        })??;

    Ok(Json(report))
}
