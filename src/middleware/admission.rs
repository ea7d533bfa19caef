//! Admission middleware for the relay WebSocket endpoint
//!
//! Reserves a session slot before the upgrade happens, so a client over
//! capacity gets a plain HTTP 503 and never reaches the WebSocket handshake.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use speech_relay::middleware::admission_middleware;
//!
//! let app = Router::new()
//!     .route("/ws", get(relay_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         admission_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::admission::{Admission, SessionPermit};
use crate::state::AppState;

/// Request extension carrying the reserved slot to the handler
///
/// The handler takes the permit out exactly once and moves it into the
/// session. If the request never reaches the handler, dropping the request
/// drops the slot and the permit is released.
#[derive(Clone, Debug)]
pub struct AdmissionSlot(Arc<Mutex<Option<SessionPermit>>>);

impl AdmissionSlot {
    fn new(permit: SessionPermit) -> Self {
        Self(Arc::new(Mutex::new(Some(permit))))
    }

    /// Take the permit; later calls return `None`
    pub fn take(&self) -> Option<SessionPermit> {
        self.0.lock().take()
    }
}

/// Middleware that enforces the session capacity for WebSocket upgrades.
///
/// Non-upgrade requests pass through without an admission check.
pub async fn admission_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    if state.is_draining() {
        tracing::info!(ip = %addr.ip(), "Rejecting connection: server shutting down");
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down.").into_response();
    }

    match state.admission.admit() {
        Admission::Allowed(permit) => {
            request.extensions_mut().insert(AdmissionSlot::new(permit));
            next.run(request).await
        }
        Admission::Rejected { capacity } => {
            tracing::warn!(
                ip = %addr.ip(),
                capacity,
                "Rejecting connection: session capacity reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayConfig, ServerConfig};
    use axum::{Extension, Router, routing::get};
    use tower::ServiceExt;

    fn state(max_sessions: usize) -> Arc<AppState> {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            tls: None,
            deepgram_api_key: Some("test-key".to_string()),
            deepgram_url: "wss://api.deepgram.com/v1/listen".to_string(),
            deepgram_model: "nova-2".to_string(),
            relay: RelayConfig {
                max_sessions,
                ..Default::default()
            },
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
        };
        AppState::new(config).unwrap()
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route(
                "/ws",
                get(|slot: Option<Extension<AdmissionSlot>>| async move {
                    match slot {
                        Some(Extension(slot)) if slot.take().is_some() => "admitted",
                        _ => "no slot",
                    }
                }),
            )
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                admission_middleware,
            ))
            .with_state(state)
    }

    fn upgrade_request() -> Request<Body> {
        let mut request = Request::builder()
            .uri("/ws")
            .header("upgrade", "websocket")
            .header("connection", "upgrade")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        request
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_upgrade_is_admitted_and_slot_released_after_request() {
        let state = state(1);
        let response = app(state.clone()).oneshot(upgrade_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "admitted");
        // The handler dropped the permit it took
        assert_eq!(state.admission.active(), 0);
    }

    #[tokio::test]
    async fn test_rejects_when_at_capacity() {
        let state = state(1);
        let Admission::Allowed(_held) = state.admission.admit() else {
            panic!("first admission should succeed");
        };

        let response = app(state.clone()).oneshot(upgrade_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.admission.active(), 1);
    }

    #[tokio::test]
    async fn test_plain_requests_bypass_admission() {
        let state = state(1);
        let Admission::Allowed(_held) = state.admission.admit() else {
            panic!("first admission should succeed");
        };

        let mut request = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));

        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "no slot");
    }

    #[tokio::test]
    async fn test_rejects_while_draining() {
        let state = state(4);
        state.shutdown.cancel();

        let response = app(state.clone()).oneshot(upgrade_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.admission.active(), 0);
    }

    #[test]
    fn test_slot_yields_permit_once() {
        let state = state(2);
        let Admission::Allowed(permit) = state.admission.admit() else {
            panic!("admission should succeed");
        };
        let slot = AdmissionSlot::new(permit);
        let clone = slot.clone();

        assert!(clone.take().is_some());
        assert!(slot.take().is_none());
        assert_eq!(state.admission.active(), 0);
    }
}
