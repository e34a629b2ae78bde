/// Key/value store with expiry holding live session state.
pub mod ephemeral;
/// Durable audit trail of closed questions.
pub mod history_store;
/// Named leased locks and the scoped lock set.
pub mod locks;
/// Database model definitions.
pub mod models;
/// Typed records on top of the ephemeral store.
pub mod session_repo;
/// Storage abstraction layer for database operations.
pub mod storage;
