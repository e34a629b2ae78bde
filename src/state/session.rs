//! Live session records kept in the ephemeral store.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::lifecycle::{LifecycleEvent, SessionStatus, TransitionError, transition};

/// Unix timestamp in milliseconds, the unit used on the wire and in every record.
pub type Millis = i64;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> Millis {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as Millis
}

/// How a question's answers are compared with the accepted answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// One choice expected; compared as a set.
    Single,
    /// Several choices expected; the submitted set must match exactly.
    Multiple,
    /// Free text; case-insensitive match against any accepted answer.
    Text,
}

/// Selectable option of a choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Choice {
    /// Identifier submitted by players.
    pub id: String,
    /// Text shown to players.
    pub label: String,
}

/// One entry of the quiz snapshot captured when the session was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Quiz-side question identifier, reused in history records.
    pub id: String,
    /// How submitted answers are compared.
    pub kind: QuestionKind,
    /// Question text.
    pub prompt: String,
    /// Options offered to players; empty for text questions.
    pub choices: Vec<Choice>,
    /// Choice ids (or accepted texts for [`QuestionKind::Text`]).
    pub correct_answers: Vec<String>,
    /// When set, the question closes on its own this many seconds after release.
    pub time_limit_seconds: Option<u32>,
}

/// Pointer to the question currently (or last) released to players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionCursor {
    /// Zero-based index into the quiz snapshot.
    pub index: usize,
    /// Moment the question opens, after the host countdown.
    pub release_time: Millis,
    /// Set once the question has been scored.
    pub closed: bool,
}

impl QuestionCursor {
    /// Whether answers for `index` are still being collected.
    pub fn accepts(&self, index: usize) -> bool {
        self.index == index && !self.closed
    }
}

/// Ephemeral game session stored under `session:<code>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    /// Stable identifier used by history records.
    pub session_id: Uuid,
    /// Six-digit join code.
    pub code: String,
    /// Identifier of the source quiz, forwarded to status notifications.
    pub quiz_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Questions in play order.
    pub quiz: Vec<Question>,
    /// Connection bound as host, once one joined.
    pub host_connection_id: Option<String>,
    /// Question currently or last released.
    pub current_question: Option<QuestionCursor>,
    /// Next dense player id handed out on join.
    pub next_player_id: u32,
    /// Creation time.
    pub created_at: Millis,
}

impl GameSession {
    /// Build a fresh `ACTIVE` session around a quiz snapshot.
    pub fn new(code: String, quiz_id: String, quiz: Vec<Question>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            code,
            quiz_id,
            status: SessionStatus::Active,
            quiz,
            host_connection_id: None,
            current_question: None,
            next_player_id: 1,
            created_at: now_millis(),
        }
    }

    /// Question at `index`, if the quiz has one.
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.quiz.get(index)
    }

    /// Whether `connection_id` is the bound host.
    pub fn is_host(&self, connection_id: &str) -> bool {
        self.host_connection_id.as_deref() == Some(connection_id)
    }

    /// Release time of the current question, if one was released.
    pub fn current_question_release_time(&self) -> Option<Millis> {
        self.current_question.map(|cursor| cursor.release_time)
    }

    /// Run `event` through the transition table and store the resulting status.
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<SessionStatus, TransitionError> {
        self.status = transition(self.status, event)?;
        Ok(self.status)
    }

    /// Hand out the next dense player id.
    pub fn allocate_player_id(&mut self) -> u32 {
        let id = self.next_player_id;
        self.next_player_id += 1;
        id
    }
}

/// Answer held for a player between submission and question close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAnswer {
    /// Question the answer was submitted for.
    pub question_index: usize,
    /// Answer exactly as submitted.
    pub raw_answer: Vec<String>,
    /// Submission time after clock-offset correction.
    pub submitted_at: Millis,
    /// Seconds between release and submission, never negative.
    pub elapsed_seconds: f64,
}

impl PendingAnswer {
    /// Build a pending answer, correcting the client clock and flooring elapsed time at zero.
    ///
    /// `clock_offset_minutes` is how far the client clock runs ahead of the server clock.
    pub fn new(
        question_index: usize,
        raw_answer: Vec<String>,
        client_submitted_at: Millis,
        clock_offset_minutes: i32,
        release_time: Millis,
    ) -> Self {
        let submitted_at = client_submitted_at - i64::from(clock_offset_minutes) * 60_000;
        let elapsed_ms = (submitted_at - release_time).max(0);
        Self {
            question_index,
            raw_answer,
            submitted_at,
            elapsed_seconds: elapsed_ms as f64 / 1_000.0,
        }
    }
}

/// Roster entry stored in the `roster:<code>` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Socket the player joined from.
    pub connection_id: String,
    /// Dense id, unique within the session.
    pub player_id: u32,
    /// Display name, unique within the session.
    pub nickname: String,
    /// Accumulated points.
    pub score: u64,
    /// Consecutive correct answers.
    pub strike_count: u32,
    /// Correct answers so far.
    pub number_of_correct_answers: u32,
    /// Position after the last scored question, 1 being best.
    pub rank: u32,
    /// Lives under its own `answer:` key; only populated on snapshots taken at question close.
    #[serde(skip)]
    pub pending_answer: Option<PendingAnswer>,
}

impl Player {
    /// Fresh roster entry with zeroed score.
    pub fn new(connection_id: String, player_id: u32, nickname: String) -> Self {
        Self {
            connection_id,
            player_id,
            nickname,
            score: 0,
            strike_count: 0,
            number_of_correct_answers: 0,
            rank: 0,
            pending_answer: None,
        }
    }
}

/// Which side of the game a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Runs the game.
    Host,
    /// Answers questions.
    Player,
}

/// Lookup record stored under `connection:<id>` to resolve a socket on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionBinding {
    /// Session the connection belongs to.
    pub session_code: String,
    /// Role the connection joined with.
    pub role: Role,
}
