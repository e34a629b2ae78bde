//! WebSocket frames exchanged with hosts and players.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::validation::{validate_game_code, validate_nickname},
    state::{
        scoring::{PlayerOutcome, QuestionStatistic},
        session::{Choice, Millis, Player, Question, QuestionKind},
    },
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from host and player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind the sender as host of a session.
    HostJoin(GameCodePayload),
    /// Join a session lobby as a player.
    PlayerJoin(PlayerJoinPayload),
    /// Start the game.
    HostStart(GameCodePayload),
    /// Release a question after a countdown.
    HostGetQuestion(GetQuestionPayload),
    /// Submit an answer to the open question.
    AnswerSubmit(AnswerSubmitPayload),
    /// Close the open question and publish results.
    QuestionEnd(QuestionPayload),
    /// Move clients to the next question.
    ProceedToNext(QuestionPayload),
    /// Any unrecognised `type`.
    #[serde(other)]
    Unknown,
}

/// Reasons an inbound frame is rejected before reaching a handler.
#[derive(Debug, Error)]
pub enum InboundError {
    /// Not valid JSON for any known message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A field failed validation.
    #[error("validation failed: {0}")]
    Invalid(#[from] ValidationErrors),
}

impl ClientMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, InboundError> {
        let message: Self = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HostJoin(_) => "host_join",
            Self::PlayerJoin(_) => "player_join",
            Self::HostStart(_) => "host_start",
            Self::HostGetQuestion(_) => "host_get_question",
            Self::AnswerSubmit(_) => "answer_submit",
            Self::QuestionEnd(_) => "question_end",
            Self::ProceedToNext(_) => "proceed_to_next",
            Self::Unknown => "unknown",
        }
    }
}

impl Validate for ClientMessage {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::HostJoin(payload) | Self::HostStart(payload) => payload.validate(),
            Self::PlayerJoin(payload) => payload.validate(),
            Self::HostGetQuestion(payload) => payload.validate(),
            Self::AnswerSubmit(payload) => payload.validate(),
            Self::QuestionEnd(payload) | Self::ProceedToNext(payload) => payload.validate(),
            Self::Unknown => Ok(()),
        }
    }
}

/// Payload carrying only a session code.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct GameCodePayload {
    /// Six-digit session code.
    #[validate(custom(function = "validate_game_code"))]
    pub game_code: String,
}

/// Payload of a player join.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct PlayerJoinPayload {
    /// Six-digit session code.
    #[validate(custom(function = "validate_game_code"))]
    pub game_code: String,
    /// Requested display name.
    #[validate(custom(function = "validate_nickname"))]
    pub nickname: String,
}

/// Payload of a question release.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct GetQuestionPayload {
    /// Six-digit session code.
    #[validate(custom(function = "validate_game_code"))]
    pub game_code: String,
    /// Question to release; one past the end completes the game.
    pub question_index: usize,
    /// Countdown before the question becomes answerable.
    #[validate(range(min = 5, max = 300))]
    pub delay_seconds: u32,
}

/// Payload of an answer submission.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct AnswerSubmitPayload {
    /// Six-digit session code.
    #[validate(custom(function = "validate_game_code"))]
    pub game_code: String,
    /// Question being answered.
    pub question_index: usize,
    /// Choice ids, or a single text answer.
    #[validate(length(max = 16))]
    pub answer: Vec<String>,
    /// Client timestamp (unix milliseconds).
    pub submitted_at: Millis,
    /// Minutes the client clock runs ahead of the server clock.
    #[serde(default)]
    #[validate(range(min = -1440, max = 1440))]
    pub clock_offset_minutes: i32,
}

/// Payload addressing one question of a session.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct QuestionPayload {
    /// Six-digit session code.
    #[validate(custom(function = "validate_game_code"))]
    pub game_code: String,
    /// Targeted question.
    pub question_index: usize,
}

/// Stable error codes sent to the originating connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No session under that code.
    GameNotFound,
    /// Another connection already hosts the session.
    HostAlreadyJoined,
    /// Nickname already used in the session.
    NicknameTaken,
    /// Host-only action from a non-host.
    NotHost,
    /// Question index out of range.
    QuestionNotFound,
    /// A second answer for the same question.
    AlreadyAnswered,
    /// Malformed or invalid frame.
    InvalidInput,
    /// Action not allowed in the current state.
    InvalidState,
    /// Locks could not be acquired; retry.
    Busy,
    /// Storage or other internal failure.
    Error,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Messages pushed to host and player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Host binding confirmed.
    HostJoined {
        /// Session code.
        code: String,
        /// Session identifier.
        session_id: Uuid,
        /// Questions in the quiz.
        question_count: usize,
    },
    /// Join confirmed to the new player.
    PlayerJoined {
        /// Assigned player id.
        player_id: u32,
        /// Accepted nickname.
        nickname: String,
    },
    /// Current lobby, sent on every roster change.
    LobbyUpdated {
        /// Players in join order.
        players: Vec<LobbyPlayer>,
        /// Number of players.
        count: usize,
    },
    /// The host started the game.
    GameStarted {
        /// Questions in the quiz.
        question_count: usize,
    },
    /// A question opens at `release_time`.
    QuestionReleased {
        /// Released question.
        question_index: usize,
        /// Question content, redacted for players.
        question: QuestionView,
        /// Moment answers start counting.
        release_time: Millis,
    },
    /// Private confirmation for the submitting player.
    AnswerAccepted {
        /// Answered question.
        question_index: usize,
        /// Corrected submission time.
        submitted_at: Millis,
    },
    /// Room-wide notice that a player answered; never carries the answer.
    AnswerAcknowledged {
        /// Player who answered.
        player_id: u32,
        /// Corrected submission time.
        submitted_at: Millis,
    },
    /// Rejection of a second submission, echoing the answer on file.
    AnswerAlreadySubmitted {
        /// Answered question.
        question_index: usize,
        /// Answer kept on file.
        answer: Vec<String>,
        /// Submission time of the kept answer.
        submitted_at: Millis,
    },
    /// Answer key and statistics, host only.
    QuestionHostResult {
        /// Closed question.
        question_index: usize,
        /// Accepted answers.
        correct_answers: Vec<String>,
        /// Aggregate over the roster.
        statistic: StatisticView,
    },
    /// Per-player results broadcast to the room.
    QuestionPlayerResult {
        /// Closed question.
        question_index: usize,
        /// Results ordered by rank.
        results: Vec<PlayerResult>,
    },
    /// Clients should get ready for the next question.
    NextQuestion {
        /// Upcoming question.
        question_index: usize,
    },
    /// Every question was played.
    GameEnded {
        /// Finished session.
        session_id: Uuid,
    },
    /// The host left and the session is over.
    HostDisconnected,
    /// Failure of the sender's last message.
    Error {
        /// Stable error code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl ServerMessage {
    /// Error frame with `code` and `message`.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Lobby snapshot listing every player in join order.
    pub fn lobby(players: &[Player]) -> Self {
        Self::LobbyUpdated {
            players: players.iter().map(LobbyPlayer::from).collect(),
            count: players.len(),
        }
    }
}

/// Lobby entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LobbyPlayer {
    /// Player id.
    pub player_id: u32,
    /// Display name.
    pub nickname: String,
}

impl From<&Player> for LobbyPlayer {
    fn from(player: &Player) -> Self {
        Self {
            player_id: player.player_id,
            nickname: player.nickname.clone(),
        }
    }
}

/// Question as displayed by clients; players never receive `correct_answers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct QuestionView {
    /// Question identifier.
    pub id: String,
    /// Answer comparison mode.
    pub kind: QuestionKind,
    /// Question text.
    pub prompt: String,
    /// Selectable options.
    pub choices: Vec<Choice>,
    /// Accepted answers, host copy only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<Vec<String>>,
    /// Auto-close delay after release.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_seconds: Option<u32>,
}

impl QuestionView {
    /// Player-facing copy with every correct-answer field stripped.
    pub fn redacted(question: &Question) -> Self {
        Self {
            correct_answers: None,
            ..Self::full(question)
        }
    }

    /// Host-facing copy.
    pub fn full(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            kind: question.kind,
            prompt: question.prompt.clone(),
            choices: question.choices.clone(),
            correct_answers: Some(question.correct_answers.clone()),
            time_limit_seconds: question.time_limit_seconds,
        }
    }
}

/// One player's outcome for a closed question.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlayerResult {
    /// Player id.
    pub player_id: u32,
    /// Display name.
    pub nickname: String,
    /// Whether the player submitted.
    pub answered: bool,
    /// Whether the answer matched.
    pub is_correct: bool,
    /// Points earned on this question.
    pub points: u64,
    /// Consecutive correct answers.
    pub streak: u32,
    /// Total score.
    pub score: u64,
    /// Rank, 1 being best.
    pub rank: u32,
    /// Answer time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
}

impl From<&PlayerOutcome> for PlayerResult {
    fn from(outcome: &PlayerOutcome) -> Self {
        Self {
            player_id: outcome.player_id,
            nickname: outcome.nickname.clone(),
            answered: outcome.answered,
            is_correct: outcome.is_correct,
            points: outcome.points_awarded,
            streak: outcome.strike_count,
            score: outcome.score,
            rank: outcome.rank,
            elapsed_seconds: outcome.elapsed_seconds,
        }
    }
}

/// Host-facing aggregate of a closed question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StatisticView {
    /// Players on the roster.
    pub total_players: usize,
    /// Players who answered.
    pub answered: usize,
    /// Players who answered correctly.
    pub correct: usize,
    /// Submission count per choice id.
    #[schema(value_type = Object)]
    pub distribution: indexmap::IndexMap<String, usize>,
}

impl From<QuestionStatistic> for StatisticView {
    fn from(value: QuestionStatistic) -> Self {
        Self {
            total_players: value.total_players,
            answered: value.answered,
            correct: value.correct,
            distribution: value.distribution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_messages() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"player_join","game_code":"123456","nickname":"ada"}"#,
        )
        .unwrap();
        match message {
            ClientMessage::PlayerJoin(payload) => {
                assert_eq!(payload.game_code, "123456");
                assert_eq!(payload.nickname, "ada");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let message = ClientMessage::from_json_str(r#"{"type":"dance"}"#).unwrap();
        assert!(matches!(message, ClientMessage::Unknown));
    }

    #[test]
    fn short_delay_is_rejected() {
        let err = ClientMessage::from_json_str(
            r#"{"type":"host_get_question","game_code":"123456","question_index":0,"delay_seconds":2}"#,
        )
        .unwrap_err();
        assert!(matches!(err, InboundError::Invalid(_)));
    }

    #[test]
    fn missing_game_code_is_rejected() {
        let err =
            ClientMessage::from_json_str(r#"{"type":"host_join","game_code":""}"#).unwrap_err();
        assert!(matches!(err, InboundError::Invalid(_)));

        let err = ClientMessage::from_json_str(r#"{"type":"host_start"}"#).unwrap_err();
        assert!(matches!(err, InboundError::Malformed(_)));
    }

    #[test]
    fn redacted_question_hides_answers() {
        let question = Question {
            id: "q1".into(),
            kind: QuestionKind::Single,
            prompt: "2 + 2".into(),
            choices: vec![Choice {
                id: "a".into(),
                label: "4".into(),
            }],
            correct_answers: vec!["a".into()],
            time_limit_seconds: None,
        };

        let json = serde_json::to_value(QuestionView::redacted(&question)).unwrap();
        assert!(json.get("correct_answers").is_none());

        let json = serde_json::to_value(QuestionView::full(&question)).unwrap();
        assert_eq!(json["correct_answers"][0], "a");
    }

    #[test]
    fn server_messages_are_tagged() {
        let json = serde_json::to_value(ServerMessage::HostDisconnected).unwrap();
        assert_eq!(json["type"], "host_disconnected");

        let json =
            serde_json::to_value(ServerMessage::error(ErrorCode::NicknameTaken, "taken")).unwrap();
        assert_eq!(json["code"], "nickname_taken");
    }
}
