//! Durable question history.

/// MongoDB backend.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

mod memory;

pub use memory::MemoryHistoryStore;

use crate::dao::models::HistoryBatch;
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Abstraction over the durable audit trail written when a question closes.
pub trait HistoryStore: Send + Sync {
    /// Append every row of the batch in one transaction; any failing row rolls back the batch.
    fn append_batch(&self, batch: HistoryBatch) -> BoxFuture<'static, StorageResult<()>>;
    /// Cheap round trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Rebuild the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
