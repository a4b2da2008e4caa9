//! HTTP status surface
//!
//! Small read-only companion to the WebSocket endpoint: a root page to verify
//! the server is up and an `/api/status` JSON snapshot for dashboards. Shares
//! the Basic credentials with the WebSocket side; an unauthorized request is
//! answered with a 401 challenge rather than a close.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{check_basic_auth, AUTH_REALM};
use crate::bridge::OwnerBridge;
use crate::registry::ConnectionRegistry;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub registry: ConnectionRegistry,
    pub bridge: OwnerBridge,
    pub username: String,
    pub password: String,
}

/// Serve the status surface until shutdown is signalled.
pub async fn serve(listener: TcpListener, state: HttpState, mut shutdown: watch::Receiver<bool>) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = router(state).layer(cors);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await;
    if let Err(e) = result {
        tracing::warn!("http status server exited with error: {}", e);
    }
}

/// Build the status router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/status", get(status_handler))
        .with_state(state)
}

async fn index_handler(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if let Err(challenge) = require_auth(&state, &headers) {
        return challenge;
    }
    "Signal Remote control server".into_response()
}

async fn status_handler(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if let Err(challenge) = require_auth(&state, &headers) {
        return challenge;
    }
    Json(serde_json::json!({
        "connections": state.registry.len(),
        "playState": state.bridge.play_state().name(),
    }))
    .into_response()
}

fn require_auth(state: &HttpState, headers: &HeaderMap) -> Result<(), Response> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if check_basic_auth(header, &state.username, &state.password) {
        return Ok(());
    }
    Err((
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{}\"", AUTH_REALM),
        )],
        "Authentication required",
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::basic_auth_header;
    use crate::bridge::OwnerRuntime;
    use crate::state::{DeviceDescriptor, SessionState};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(owner: &OwnerRuntime, password: &str) -> HttpState {
        HttpState {
            registry: ConnectionRegistry::new(),
            bridge: owner.bridge(),
            username: "admin".to_string(),
            password: password.to_string(),
        }
    }

    fn spawn_owner() -> OwnerRuntime {
        OwnerRuntime::spawn(SessionState::new(
            vec!["circle".to_string()],
            DeviceDescriptor::default(),
        ))
    }

    #[tokio::test]
    async fn test_status_reports_connections_and_play_state() {
        let owner = spawn_owner();
        let app = router(test_state(&owner, ""));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["connections"], serde_json::json!(0));
        assert_eq!(json["playState"], serde_json::json!("STOPPED"));

        owner.shutdown();
    }

    #[tokio::test]
    async fn test_unauthorized_request_gets_basic_challenge() {
        let owner = spawn_owner();
        let app = router(test_state(&owner, "secret"));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.contains("Basic realm="));

        owner.shutdown();
    }

    #[tokio::test]
    async fn test_authorized_request_passes() {
        let owner = spawn_owner();
        let app = router(test_state(&owner, "secret"));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .header(header::AUTHORIZATION, basic_auth_header("admin", "secret"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        owner.shutdown();
    }
}
