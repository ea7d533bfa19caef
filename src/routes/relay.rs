//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /ws` - WebSocket upgrade for audio relay
///
/// # Protocol
///
/// Clients stream binary audio (linear16, 16 kHz, mono) and may send a
/// language selection at any time:
///
/// ```json
/// {"config": "language", "language": 3}
/// ```
///
/// The relay answers `{"config_received": true, "language": "nl"}` and, if the
/// language changed, reopens the upstream stream with the new locale. Every
/// other frame is forwarded to Deepgram unchanged, and Deepgram results are
/// relayed back byte-for-byte.
///
/// Admission is enforced by the admission middleware, applied in
/// [`super::create_router`].
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
