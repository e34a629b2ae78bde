//! In-process history store.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    history_store::HistoryStore,
    models::{HistoryBatch, HistoryRecord},
    storage::{StorageError, StorageResult},
};

/// In-process [`HistoryStore`] honouring the same uniqueness and rollback rules as the database.
#[derive(Clone, Default)]
pub struct MemoryHistoryStore {
    rows: Arc<Mutex<Vec<HistoryRecord>>>,
}

impl MemoryHistoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every committed row, in commit order.
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Committed rows for one session and question.
    pub fn records_for(&self, session_id: Uuid, question_id: &str) -> Vec<HistoryRecord> {
        self.records()
            .into_iter()
            .filter(|row| row.session_id == session_id && row.question_id == question_id)
            .collect()
    }

    fn commit(&self, batch: HistoryBatch) -> StorageResult<()> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StorageError::conflict("history store poisoned"))?;

        let mut seen: HashSet<(Uuid, u32, String)> = rows
            .iter()
            .map(|row| (row.session_id, row.player_id, row.question_id.clone()))
            .collect();

        // Validate the whole batch before touching the committed rows.
        for row in &batch.rows {
            if row.session_id != batch.session_id || row.question_id != batch.question_id {
                return Err(StorageError::conflict(format!(
                    "row for player {} does not belong to batch {}/{}",
                    row.player_id, batch.session_id, batch.question_id
                )));
            }
            let (session_id, player_id, question_id) = row.identity();
            if !seen.insert((session_id, player_id, question_id.to_owned())) {
                return Err(StorageError::conflict(format!(
                    "duplicate history row for session {session_id}, player {player_id}, question `{question_id}`"
                )));
            }
        }

        rows.extend(batch.rows);
        Ok(())
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append_batch(&self, batch: HistoryBatch) -> BoxFuture<'static, StorageResult<()>> {
        let outcome = self.commit(batch);
        Box::pin(async move { outcome })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
