//! Service error taxonomy and its mapping to HTTP responses and error frames.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::{locks::LockError, storage::StorageError},
    dto::ws::{ErrorCode, InboundError, ServerMessage},
    state::{
        lifecycle::{GuardError, TransitionError},
        session::PendingAnswer,
    },
};

/// Missing resources reported back to a single caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// No session under the code.
    Game,
    /// Question index out of range.
    Question,
    /// The connection is not on the roster.
    Player,
}

/// Requests that clash with state already on file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Another connection hosts the session.
    HostAlreadyJoined,
    /// The nickname is in use.
    NicknameTaken,
    /// The question was already closed (or never opened for answers).
    QuestionClosed,
    /// The connection is already bound to a session.
    AlreadyBound,
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A referenced resource does not exist.
    #[error("{0:?} not found")]
    NotFound(NotFoundKind),
    /// Non-host attempting a host-only action.
    #[error("only the host may perform this action")]
    NotHost,
    /// The request clashes with existing state.
    #[error("conflict: {0:?}")]
    Conflict(ConflictKind),
    /// A second submission for the same question; carries the answer on file.
    #[error("answer already submitted for question {}", .0.question_index)]
    AlreadyAnswered(Box<PendingAnswer>),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A lock stayed busy through every retry.
    #[error("resource busy, retry the action")]
    LockUnavailable(#[source] LockError),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
}

impl ServiceError {
    /// Outbound error code sent to the originating WebSocket connection.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::InvalidInput(_) => ErrorCode::InvalidInput,
            ServiceError::NotFound(NotFoundKind::Game) => ErrorCode::GameNotFound,
            ServiceError::NotFound(NotFoundKind::Question) => ErrorCode::QuestionNotFound,
            ServiceError::NotFound(NotFoundKind::Player) => ErrorCode::Error,
            ServiceError::NotHost => ErrorCode::NotHost,
            ServiceError::Conflict(ConflictKind::HostAlreadyJoined) => ErrorCode::HostAlreadyJoined,
            ServiceError::Conflict(ConflictKind::NicknameTaken) => ErrorCode::NicknameTaken,
            ServiceError::Conflict(ConflictKind::QuestionClosed | ConflictKind::AlreadyBound) => {
                ErrorCode::InvalidState
            }
            ServiceError::AlreadyAnswered(_) => ErrorCode::AlreadyAnswered,
            ServiceError::InvalidState(_) => ErrorCode::InvalidState,
            ServiceError::LockUnavailable(_) => ErrorCode::Busy,
            ServiceError::Unavailable(_) => ErrorCode::Error,
        }
    }

    /// Outbound frame describing this error.
    pub fn to_message(&self) -> ServerMessage {
        match self {
            ServiceError::AlreadyAnswered(pending) => ServerMessage::AnswerAlreadySubmitted {
                question_index: pending.question_index,
                answer: pending.raw_answer.clone(),
                submitted_at: pending.submitted_at,
            },
            other => ServerMessage::error(other.code(), other.to_string()),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<LockError> for ServiceError {
    fn from(err: LockError) -> Self {
        ServiceError::LockUnavailable(err)
    }
}

impl From<TransitionError> for ServiceError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::EmptyRoster => {
                ServiceError::InvalidState("cannot start a game without players".into())
            }
            TransitionError::Invalid(invalid) => ServiceError::InvalidState(invalid.to_string()),
        }
    }
}

impl From<GuardError> for ServiceError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::NotHost => ServiceError::NotHost,
            GuardError::WrongStatus { .. } => ServiceError::InvalidState(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

impl From<InboundError> for ServiceError {
    fn from(err: InboundError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Caller lacks the role required for the action.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(_) => AppError::NotFound(message),
            ServiceError::NotHost => AppError::Forbidden(message),
            ServiceError::Conflict(_)
            | ServiceError::AlreadyAnswered(_)
            | ServiceError::InvalidState(_) => AppError::Conflict(message),
            ServiceError::LockUnavailable(_) | ServiceError::Unavailable(_) => {
                AppError::ServiceUnavailable(message)
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
