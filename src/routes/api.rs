use std::sync::Arc;

use axum::{routing::get, Router};

use crate::handlers::{diagnostics, health_check, ready_check, session_state};
use crate::AppState;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/session", get(session_state))
        .route("/v1/diagnostics", get(diagnostics))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::engine::mock::MockEngine;
    use crate::engine::PageHandle;
    use crate::session::testing::test_config;
    use crate::session::{ParticipantId, Session};

    async fn app() -> (Router, Arc<AppState>, Arc<MockEngine>) {
        let engine = MockEngine::new();
        let session = Session::start(test_config(), engine.clone()).await.unwrap();
        let state = Arc::new(AppState {
            session,
            config: Config::default(),
        });
        (create_api_routes(state.clone()), state, engine)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_is_always_ok() {
        let (router, _state, _engine) = app().await;
        let (status, body) = get_json(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ready_follows_page_liveness() {
        let (router, _state, engine) = app().await;
        let (status, body) = get_json(router.clone(), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pageAttached"], true);

        engine.first_page().close_now();
        assert!(engine.first_page().is_closed());
        let (status, body) = get_json(router, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], 503);
    }

    #[tokio::test]
    async fn test_session_state_reports_queue_and_history() {
        let (router, state, engine) = app().await;
        state.session.join(ParticipantId::from("a"));
        state.session.join(ParticipantId::from("b"));
        engine.first_page().navigate_organically("https://a.test/");
        crate::session::testing::wait_until(|| {
            state.session.snapshot().current_url.as_deref() == Some("https://a.test/")
        })
        .await;

        let (status, body) = get_json(router, "/v1/session").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["orderedIds"], serde_json::json!(["a", "b"]));
        assert_eq!(body["holder"], "a");
        assert_eq!(body["currentUrl"], "https://a.test/");
        assert_eq!(body["history"], serde_json::json!(["https://a.test/"]));
        assert_eq!(body["navigating"], false);
    }

    #[tokio::test]
    async fn test_diagnostics_counts_participants() {
        let (router, state, _engine) = app().await;
        state.session.join(ParticipantId::from("a"));

        let (status, body) = get_json(router, "/v1/diagnostics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["n_participants"], 1);
        assert_eq!(body["commands_dropped"], 0);
        assert!(body["memory_total"].is_u64());
    }
}
