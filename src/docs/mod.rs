use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "A live browser page is attached", body = ReadyResponse),
        (status = 503, description = "No live browser page", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Shared session state
#[utoipa::path(
    get,
    path = "/api/v1/session",
    responses(
        (status = 200, description = "Control queue and navigation state", body = SessionStateResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_state_doc() {}

/// Session and host diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Counters and host load", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        session_state_doc,
        diagnostics_doc,
    ),
    components(
        schemas(HealthResponse, ReadyResponse, ErrorResponse, SessionStateResponse, DiagnosticsResponse)
    ),
    tags(
        (name = "cobrowse", description = "Shared browsing session")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for path in ["/api/health", "/api/ready", "/api/v1/session", "/api/v1/diagnostics"] {
            assert!(paths.iter().any(|p| p.as_str() == path), "{path} missing");
        }
    }
}
