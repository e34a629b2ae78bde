use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        session::{CreateSessionRequest, CreateSessionResponse, SessionSummary},
        validation::validate_game_code,
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes opening and inspecting live sessions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{code}", get(get_session))
}

/// Open a live session around a materialized quiz and return its join code.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Invalid quiz snapshot"),
        (status = 503, description = "Live-state store unavailable")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let created = session_service::create_session(&state, payload).await?;
    Ok(Json(created))
}

/// Summarize a live session by its join code.
#[utoipa::path(
    get,
    path = "/sessions/{code}",
    tag = "sessions",
    params(("code" = String, Path, description = "Six digit join code")),
    responses(
        (status = 200, description = "Session summary", body = SessionSummary),
        (status = 404, description = "No live session under this code")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    validate_game_code(&code).map_err(|_| AppError::BadRequest("malformed game code".into()))?;
    let summary = session_service::summary(&state, &code).await?;
    Ok(Json(summary))
}
