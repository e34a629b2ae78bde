//! Quiz live backend entrypoint wiring the REST, WebSocket and history layers.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_live_back::{
    config::AppConfig,
    dao::{
        ephemeral::MemoryStore,
        history_store::{HistoryStore, MemoryHistoryStore},
        locks::MemoryLockManager,
    },
    routes,
    services::notifier,
    state::{AppState, SharedState},
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let notifier = notifier::from_config(config.status_webhook_url());

    let store = MemoryStore::new();
    store.spawn_sweeper(SWEEP_INTERVAL);

    let app_state = AppState::new(
        config,
        Arc::new(store),
        Arc::new(MemoryLockManager::new()),
        notifier,
    );

    start_history_store(app_state.clone()).await;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Supervise MongoDB when `MONGO_URI` is set, otherwise keep history in memory.
#[cfg(feature = "mongo-store")]
async fn start_history_store(state: SharedState) {
    use quiz_live_back::{
        dao::{
            history_store::mongodb::{MongoConfig, MongoHistoryStore},
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    if env::var("MONGO_URI").is_err() {
        install_memory_history(&state).await;
        return;
    }

    info!("MONGO_URI set; supervising the MongoDB history store");
    tokio::spawn(storage_supervisor::run(state, || async {
        let config = MongoConfig::from_env().await?;
        let store = MongoHistoryStore::connect(config).await?;
        Ok::<_, StorageError>(Arc::new(store) as Arc<dyn HistoryStore>)
    }));
}

#[cfg(not(feature = "mongo-store"))]
async fn start_history_store(state: SharedState) {
    if env::var("MONGO_URI").is_ok() {
        warn!("MONGO_URI is set but the `mongo-store` feature is disabled; ignoring");
    }
    install_memory_history(&state).await;
}

async fn install_memory_history(state: &SharedState) {
    info!("recording question history in memory");
    let store: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
    state.install_history_store(store).await;
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
