//! WebSocket message dispatch.
//!
//! Every failure is reported to the originating connection only; locks are released by the
//! services before the error frame is queued.

use tracing::{debug, warn};

use crate::{
    dto::ws::{ClientMessage, ErrorCode, ServerMessage},
    error::ServiceError,
    services::{
        question_service::{self, Closer, Submission},
        roster_service, session_service,
    },
    state::SharedState,
};

/// Parse a text frame and dispatch it.
pub async fn handle_text(state: &SharedState, connection_id: &str, text: &str) {
    match ClientMessage::from_json_str(text) {
        Ok(message) => handle_message(state, connection_id, message).await,
        Err(err) => {
            warn!(connection_id, error = %err, "failed to parse or validate client message");
            state.hub().send_to(
                connection_id,
                ServerMessage::error(ErrorCode::InvalidInput, err.to_string()),
            );
        }
    }
}

/// Dispatch one validated message, converting any error into an error frame.
pub async fn handle_message(state: &SharedState, connection_id: &str, message: ClientMessage) {
    let kind = message.kind();
    if let Err(err) = dispatch(state, connection_id, message).await {
        warn!(connection_id, kind, error = %err, "request rejected");
        state.hub().send_to(connection_id, err.to_message());
    }
}

async fn dispatch(
    state: &SharedState,
    connection_id: &str,
    message: ClientMessage,
) -> Result<(), ServiceError> {
    match message {
        ClientMessage::HostJoin(payload) => {
            roster_service::join_host(state, connection_id, &payload.game_code).await
        }
        ClientMessage::PlayerJoin(payload) => {
            roster_service::join_player(state, connection_id, &payload.game_code, &payload.nickname)
                .await
        }
        ClientMessage::HostStart(payload) => {
            session_service::start_game(state, connection_id, &payload.game_code).await
        }
        ClientMessage::HostGetQuestion(payload) => {
            question_service::release_question(
                state,
                connection_id,
                &payload.game_code,
                payload.question_index,
                payload.delay_seconds,
            )
            .await
        }
        ClientMessage::AnswerSubmit(payload) => {
            question_service::submit_answer(
                state,
                connection_id,
                &payload.game_code,
                Submission {
                    question_index: payload.question_index,
                    answer: payload.answer,
                    submitted_at: payload.submitted_at,
                    clock_offset_minutes: payload.clock_offset_minutes,
                },
            )
            .await
        }
        ClientMessage::QuestionEnd(payload) => {
            question_service::close_question(
                state,
                Closer::Host(connection_id),
                &payload.game_code,
                payload.question_index,
            )
            .await
            .map(drop)
        }
        ClientMessage::ProceedToNext(payload) => {
            question_service::proceed_to_next(
                state,
                connection_id,
                &payload.game_code,
                payload.question_index,
            )
            .await
        }
        ClientMessage::Unknown => {
            debug!(connection_id, "ignoring unknown message type");
            Ok(())
        }
    }
}
