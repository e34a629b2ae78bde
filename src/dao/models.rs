//! Records written to the history store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable audit row describing one player's outcome for one closed question.
///
/// Rows are append-only; `(session_id, player_id, question_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    /// Session the row belongs to.
    pub session_id: Uuid,
    /// Player the row describes.
    pub player_id: u32,
    /// Closed question.
    pub question_id: String,
    /// Raw submitted answer; empty when the player did not answer.
    pub answer: Vec<String>,
    /// Whether the answer matched.
    pub is_correct: bool,
    /// Points earned on the question.
    pub points_awarded: u64,
    /// Running total after this question.
    pub score: u64,
    /// Streak after the question.
    pub strike_count: u32,
    /// Submission timestamp (unix milliseconds, clock-offset corrected).
    pub submitted_at: Option<i64>,
    /// Display name at the time.
    pub nickname: String,
    /// Rank after this question.
    pub rank: u32,
}

impl HistoryRecord {
    /// Identity used by the uniqueness constraint.
    pub fn identity(&self) -> (Uuid, u32, &str) {
        (self.session_id, self.player_id, self.question_id.as_str())
    }
}

/// All rows produced by closing a single question; written all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBatch {
    /// Session the batch belongs to.
    pub session_id: Uuid,
    /// Closed question.
    pub question_id: String,
    /// One row per roster player.
    pub rows: Vec<HistoryRecord>,
}
