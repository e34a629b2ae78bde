/// OpenAPI documentation generation.
pub mod documentation;
/// WebSocket message dispatch.
pub mod handlers;
/// Health check service.
pub mod health_service;
/// Durable audit trail of closed questions.
pub mod history_service;
/// Lifecycle notifications to the quiz-run service.
pub mod notifier;
/// Question release, answer collection, scoring and advance.
pub mod question_service;
/// Host and player membership.
pub mod roster_service;
/// Session creation, summary and start.
pub mod session_service;
/// History store connection supervisor with degraded mode.
pub mod storage_supervisor;
/// WebSocket connection lifecycle.
pub mod websocket_service;
