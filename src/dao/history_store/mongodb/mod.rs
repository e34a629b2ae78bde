//! MongoDB implementation of the history store.

mod config;
mod error;
mod models;
/// Store implementation and connection handling.
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoHistoryStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::DuplicateRow { .. } => StorageError::conflict(err.to_string()),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
