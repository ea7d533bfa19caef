pub mod api;
pub mod relay;

use std::sync::Arc;

use axum::{Router, middleware};

use crate::middleware::admission_middleware;
use crate::state::AppState;

/// Combine the public API and the admission-guarded relay routes
///
/// Serve with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// admission middleware reads the peer address.
pub fn create_router(state: Arc<AppState>) -> Router {
    let relay_routes = relay::create_relay_router().layer(middleware::from_fn_with_state(
        state.clone(),
        admission_middleware,
    ));

    api::create_api_router()
        .merge(relay_routes)
        .with_state(state)
}
