//! HTTP router assembly.

use axum::Router;

use crate::state::SharedState;

/// Swagger UI and OpenAPI document.
pub mod docs;
/// Health check route.
pub mod health;
/// Session REST routes.
pub mod sessions;
/// WebSocket upgrade route.
pub mod websocket;

/// Compose the REST, WebSocket and documentation routes around the shared state.
pub fn router(state: SharedState) -> Router<()> {
    Router::new()
        .merge(health::router())
        .merge(sessions::router())
        .merge(websocket::router())
        .merge(docs::router())
        .with_state(state)
}
