use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::debug;

use crate::models::{ErrorResponse, SessionStateResponse};
use crate::AppState;

/// Current queue and navigation state of the shared session
pub async fn session_state(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<SessionStateResponse>), (StatusCode, Json<ErrorResponse>)> {
    let snapshot = state.session.snapshot();
    debug!(
        "Session state requested: {} participants, url {:?}",
        snapshot.ordered_ids.len(),
        snapshot.current_url
    );
    Ok((StatusCode::OK, Json(snapshot.into())))
}
