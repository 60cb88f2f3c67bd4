use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, warn};

use crate::models::{ErrorResponse, HealthResponse, ReadyResponse};
use crate::AppState;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint; ready once a live page is attached
pub async fn ready_check(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<ReadyResponse>), (StatusCode, Json<ErrorResponse>)> {
    debug!("Readiness check requested");
    if !state.session.is_ready() {
        warn!("Readiness check failed: no live browser page");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "No live browser page",
            )),
        ));
    }
    Ok((
        StatusCode::OK,
        Json(ReadyResponse {
            status: "ok".to_string(),
            message: "Service is ready".to_string(),
            page_attached: true,
        }),
    ))
}
