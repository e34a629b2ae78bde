use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use mongodb::{
    Client, Collection, Database,
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::{sync::RwLock, time::sleep};
use tracing::{debug, info};

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::MongoHistoryDocument,
};
use crate::dao::{history_store::HistoryStore, models::HistoryBatch, storage::StorageResult};

const HISTORY_COLLECTION_NAME: &str = "question_history";
const DUPLICATE_KEY_CODE: i32 = 11000;
/// Pings tried before a connect or reconnect gives up; the supervisor owns the long backoff.
const OPEN_ATTEMPTS: u32 = 3;
const OPEN_BACKOFF: Duration = Duration::from_millis(200);

/// MongoDB-backed [`HistoryStore`] writing each batch inside a multi-document transaction.
#[derive(Clone)]
pub struct MongoHistoryStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let fresh = MongoState::open(&self.config).await?;
        *self.state.write().await = fresh;
        Ok(())
    }
}

impl MongoState {
    /// Build a client for the history database and wait until it answers a ping.
    async fn open(config: &MongoConfig) -> MongoResult<Self> {
        let client = Client::with_options(config.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&config.database_name);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match database.run_command(doc! { "ping": 1 }).await {
                Ok(_) => {
                    info!(database = %config.database_name, attempt, "history database reachable");
                    return Ok(Self { client, database });
                }
                Err(source) if attempt >= OPEN_ATTEMPTS => {
                    return Err(MongoDaoError::Unreachable {
                        database: config.database_name.clone(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    debug!(database = %config.database_name, attempt, error = %err, "history database ping failed");
                    sleep(OPEN_BACKOFF * attempt).await;
                }
            }
        }
    }
}

impl MongoHistoryStore {
    /// Establish a connection to MongoDB and ensure the uniqueness index is present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let state = MongoState::open(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(state),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"session_id": 1, "player_id": 1, "question_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("history_identity_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: HISTORY_COLLECTION_NAME,
                index: "session_id,player_id,question_id",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoHistoryDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoHistoryDocument>(HISTORY_COLLECTION_NAME)
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn append(&self, batch: HistoryBatch) -> MongoResult<()> {
        let HistoryBatch {
            session_id,
            question_id,
            rows,
        } = batch;
        if rows.is_empty() {
            return Ok(());
        }

        let documents: Vec<MongoHistoryDocument> = rows.into_iter().map(Into::into).collect();
        let collection = self.collection().await;
        let client = self.client().await;

        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Transaction { session_id, source })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction { session_id, source })?;

        if let Err(source) = collection.insert_many(documents).session(&mut session).await {
            // The failing row poisons the whole batch.
            let _ = session.abort_transaction().await;
            return Err(if is_duplicate_key(&source) {
                MongoDaoError::DuplicateRow {
                    session_id,
                    question_id,
                    source,
                }
            } else {
                MongoDaoError::AppendBatch {
                    session_id,
                    question_id,
                    source,
                }
            });
        }

        session
            .commit_transaction()
            .await
            .map_err(|source| MongoDaoError::AppendBatch {
                session_id,
                question_id,
                source,
            })
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()
            .is_some_and(|errors| errors.iter().any(|e| e.code == DUPLICATE_KEY_CODE)),
        ErrorKind::Write(WriteFailure::WriteError(error)) => error.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

impl HistoryStore for MongoHistoryStore {
    fn append_batch(&self, batch: HistoryBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.append(batch).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
