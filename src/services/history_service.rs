//! Audit trail side channel written after every closed question.

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{HistoryBatch, HistoryRecord},
        storage::StorageError,
    },
    state::{SharedState, scoring::PlayerOutcome},
};

/// One row per player for the question, in rank order.
pub fn build_batch(session_id: Uuid, question_id: &str, outcomes: &[PlayerOutcome]) -> HistoryBatch {
    let rows = outcomes
        .iter()
        .map(|outcome| HistoryRecord {
            session_id,
            player_id: outcome.player_id,
            question_id: question_id.to_owned(),
            answer: outcome.answer.clone(),
            is_correct: outcome.is_correct,
            points_awarded: outcome.points_awarded,
            score: outcome.score,
            strike_count: outcome.strike_count,
            submitted_at: outcome.submitted_at,
            nickname: outcome.nickname.clone(),
            rank: outcome.rank,
        })
        .collect();

    HistoryBatch {
        session_id,
        question_id: question_id.to_owned(),
        rows,
    }
}

/// Append `batch` on a detached task.
///
/// Failures (including degraded mode) are logged and never touch the live game.
pub fn record_detached(state: SharedState, batch: HistoryBatch) -> JoinHandle<()> {
    tokio::spawn(async move {
        let session_id = batch.session_id;
        let question_id = batch.question_id.clone();
        let rows = batch.rows.len();

        let Some(store) = state.history_store().await else {
            warn!(%session_id, %question_id, rows, "history store unavailable (degraded mode); dropping batch");
            return;
        };

        match store.append_batch(batch).await {
            Ok(()) => info!(%session_id, %question_id, rows, "recorded question history"),
            Err(StorageError::Conflict { message }) => {
                warn!(%session_id, %question_id, %message, "history batch rejected; nothing written")
            }
            Err(err) => {
                warn!(%session_id, %question_id, error = %err, "failed to record question history")
            }
        }
    })
}
