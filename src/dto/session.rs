//! REST payloads for opening and inspecting sessions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dto::format_millis,
    state::{
        lifecycle::SessionStatus,
        session::{Choice, GameSession, Question, QuestionKind},
    },
};

/// Payload used to open a live session around a materialized quiz.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Identifier of the quiz the snapshot came from.
    #[validate(length(min = 1, max = 128))]
    pub quiz_id: String,
    /// Questions in play order.
    #[validate(length(min = 1), nested)]
    pub questions: Vec<QuestionInput>,
}

/// One question of the quiz snapshot.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuestionInput {
    /// Quiz-side question identifier.
    pub id: String,
    /// Answer comparison mode.
    pub kind: QuestionKind,
    /// Question text.
    pub prompt: String,
    /// Options for choice questions; must be empty for text questions.
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Accepted choice ids or texts.
    pub correct_answers: Vec<String>,
    /// Seconds after release before the question closes on its own.
    #[serde(default)]
    pub time_limit_seconds: Option<u32>,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.id.trim().is_empty() {
            errors.add("id", ValidationError::new("question_id_blank"));
        }

        if self.correct_answers.is_empty() {
            errors.add("correct_answers", ValidationError::new("no_correct_answer"));
        }

        match self.kind {
            QuestionKind::Single | QuestionKind::Multiple => {
                let ids: HashSet<&str> = self.choices.iter().map(|c| c.id.as_str()).collect();
                if ids.len() != self.choices.len() {
                    errors.add("choices", ValidationError::new("duplicate_choice_id"));
                }
                if self
                    .correct_answers
                    .iter()
                    .any(|answer| !ids.contains(answer.as_str()))
                {
                    errors.add("correct_answers", ValidationError::new("unknown_choice_id"));
                }
                if self.kind == QuestionKind::Single && self.correct_answers.len() > 1 {
                    errors.add("correct_answers", ValidationError::new("single_expects_one"));
                }
            }
            QuestionKind::Text => {}
        }

        if self.time_limit_seconds == Some(0) {
            errors.add("time_limit_seconds", ValidationError::new("zero_time_limit"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl From<QuestionInput> for Question {
    fn from(value: QuestionInput) -> Self {
        Self {
            id: value.id,
            kind: value.kind,
            prompt: value.prompt,
            choices: value.choices,
            correct_answers: value.correct_answers,
            time_limit_seconds: value.time_limit_seconds,
        }
    }
}

/// Identifiers handed back once a session is open.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateSessionResponse {
    /// Identifier of the new session.
    pub session_id: Uuid,
    /// Six-digit code players join with.
    pub code: String,
}

/// Read-only view of a live session for operators.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: Uuid,
    /// Join code.
    pub code: String,
    /// Source quiz.
    pub quiz_id: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Whether a host is bound.
    pub host_connected: bool,
    /// Players on the roster.
    pub player_count: usize,
    /// Questions in the quiz.
    pub question_count: usize,
    /// Question currently or last released.
    pub current_question_index: Option<usize>,
    /// Creation time, RFC 3339.
    pub created_at: String,
}

impl SessionSummary {
    /// Summarise `session` with its current roster size.
    pub fn new(session: &GameSession, player_count: usize) -> Self {
        Self {
            session_id: session.session_id,
            code: session.code.clone(),
            quiz_id: session.quiz_id.clone(),
            status: session.status,
            host_connected: session.host_connection_id.is_some(),
            player_count,
            question_count: session.quiz.len(),
            current_question_index: session.current_question.map(|cursor| cursor.index),
            created_at: format_millis(session.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> CreateSessionRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn accepts_well_formed_quiz() {
        let payload = request(
            r#"{"quiz_id":"geo","questions":[
                {"id":"q1","kind":"single","prompt":"Capital of France?",
                 "choices":[{"id":"a","label":"Paris"},{"id":"b","label":"Lyon"}],
                 "correct_answers":["a"],"time_limit_seconds":20},
                {"id":"q2","kind":"text","prompt":"Longest river?","correct_answers":["Nile"]}
            ]}"#,
        );
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_correct_choice() {
        let payload = request(
            r#"{"quiz_id":"geo","questions":[
                {"id":"q1","kind":"multiple","prompt":"?",
                 "choices":[{"id":"a","label":"A"}],"correct_answers":["a","z"]}
            ]}"#,
        );
        assert!(payload.validate().is_err());
    }

    #[test]
    fn rejects_empty_quiz() {
        let payload = request(r#"{"quiz_id":"geo","questions":[]}"#);
        assert!(payload.validate().is_err());
    }

    #[test]
    fn nested_question_errors_are_reported() {
        let payload = request(
            r#"{"quiz_id":"geo","questions":[
                {"id":"q1","kind":"text","prompt":"?","correct_answers":[],"time_limit_seconds":0}
            ]}"#,
        );
        assert!(payload.validate().is_err());
        assert!(serde_json::to_value(&payload.questions[0]).is_ok());
    }
}
