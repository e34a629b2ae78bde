//! Library crate for quiz-live-back, exposing modules for binaries and integration tests.

/// Configuration loading.
pub mod config;
/// Storage backends and typed repositories.
pub mod dao;
/// REST and WebSocket payloads.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP and WebSocket routing.
pub mod routes;
/// Game logic behind the routes.
pub mod services;
/// Shared state and live session records.
pub mod state;
