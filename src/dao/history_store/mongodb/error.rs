//! Errors raised by the MongoDB history backend.

use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for the MongoDB history backend.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB history backend.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// A required environment variable is unset.
    #[error("missing environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Connection string as given.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The driver rejected the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Every ping of a connect attempt failed.
    #[error("history database `{database}` unreachable after {attempts} ping(s)")]
    Unreachable {
        /// Database name.
        database: String,
        /// Pings tried.
        attempts: u32,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A periodic health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// An index could not be created.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Target collection.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A transaction could not be started.
    #[error("failed to open a transaction for session `{session_id}`")]
    Transaction {
        /// Session of the batch.
        session_id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A batch insert failed and was rolled back.
    #[error("history batch for session `{session_id}` question `{question_id}` was rolled back")]
    AppendBatch {
        /// Session of the batch.
        session_id: Uuid,
        /// Question of the batch.
        question_id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A batch row collides with an existing one.
    #[error("history batch for session `{session_id}` question `{question_id}` repeats an existing row")]
    DuplicateRow {
        /// Session of the batch.
        session_id: Uuid,
        /// Question of the batch.
        question_id: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
}
