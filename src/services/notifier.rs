//! Fire-and-forget lifecycle notifications to the quiz-run service.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::lifecycle::SessionStatus;

/// Terminal status reached by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    /// Session that changed.
    pub session_id: Uuid,
    /// Source quiz.
    pub quiz_id: String,
    /// Join code.
    pub code: String,
    /// Status reached.
    pub status: SessionStatus,
}

/// Failures raised while delivering a status notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The HTTP client could not be built.
    #[cfg(feature = "http-notifier")]
    #[error("failed to build notification client")]
    ClientBuilder {
        /// HTTP client error.
        #[source]
        source: reqwest::Error,
    },
    /// The request did not complete.
    #[cfg(feature = "http-notifier")]
    #[error("failed to send status notification to `{url}`")]
    RequestSend {
        /// Target URL.
        url: String,
        /// HTTP client error.
        #[source]
        source: reqwest::Error,
    },
    /// The receiver answered with a non-success status.
    #[cfg(feature = "http-notifier")]
    #[error("unexpected status notification response status {status} from `{url}`")]
    RequestStatus {
        /// Target URL.
        url: String,
        /// Status returned.
        status: reqwest::StatusCode,
    },
}

/// Receiver of `COMPLETED`/`TERMINATED` transitions.
pub trait StatusNotifier: Send + Sync {
    /// Deliver one status change.
    fn notify(&self, change: StatusChange) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Notifier that only records the change in the logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl StatusNotifier for LogNotifier {
    fn notify(&self, change: StatusChange) -> BoxFuture<'static, Result<(), NotifyError>> {
        Box::pin(async move {
            info!(
                session_id = %change.session_id,
                quiz_id = %change.quiz_id,
                code = %change.code,
                status = ?change.status,
                "session status changed"
            );
            Ok(())
        })
    }
}

/// Notifier posting the change as JSON to a webhook.
#[cfg(feature = "http-notifier")]
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    url: Arc<str>,
}

#[cfg(feature = "http-notifier")]
impl HttpNotifier {
    /// Notifier posting to `url` with a five second timeout.
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|source| NotifyError::ClientBuilder { source })?;
        Ok(Self {
            client,
            url: Arc::from(url),
        })
    }
}

#[cfg(feature = "http-notifier")]
impl StatusNotifier for HttpNotifier {
    fn notify(&self, change: StatusChange) -> BoxFuture<'static, Result<(), NotifyError>> {
        let client = self.client.clone();
        let url = self.url.to_string();
        Box::pin(async move {
            let response = client.post(&url).json(&change).send().await.map_err(|source| {
                NotifyError::RequestSend {
                    url: url.clone(),
                    source,
                }
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(NotifyError::RequestStatus { url, status });
            }
            Ok(())
        })
    }
}

/// Build the notifier matching the configured webhook, if any.
pub fn from_config(webhook_url: Option<&str>) -> Arc<dyn StatusNotifier> {
    match webhook_url {
        #[cfg(feature = "http-notifier")]
        Some(url) => match HttpNotifier::new(url) {
            Ok(notifier) => {
                info!(url, "posting session status changes to webhook");
                Arc::new(notifier)
            }
            Err(err) => {
                warn!(error = %err, "failed to build webhook notifier; logging status changes only");
                Arc::new(LogNotifier)
            }
        },
        #[cfg(not(feature = "http-notifier"))]
        Some(url) => {
            warn!(url, "webhook configured but http-notifier feature is disabled");
            Arc::new(LogNotifier)
        }
        None => Arc::new(LogNotifier),
    }
}

/// Deliver `change` on a detached task; failures are logged and never reach the game.
pub fn notify_detached(notifier: Arc<dyn StatusNotifier>, change: StatusChange) {
    tokio::spawn(async move {
        let session_id = change.session_id;
        let status = change.status;
        if let Err(err) = notifier.notify(change).await {
            warn!(%session_id, ?status, error = %err, "status notification failed");
        }
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Notifier capturing every change for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) changes: Mutex<Vec<StatusChange>>,
    }

    impl StatusNotifier for RecordingNotifier {
        fn notify(&self, change: StatusChange) -> BoxFuture<'static, Result<(), NotifyError>> {
            self.changes.lock().unwrap().push(change);
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn detached_notification_is_delivered() {
        let notifier = Arc::new(RecordingNotifier::default());
        let change = StatusChange {
            session_id: Uuid::new_v4(),
            quiz_id: "quiz".into(),
            code: "123456".into(),
            status: SessionStatus::Completed,
        };

        notify_detached(notifier.clone(), change.clone());
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(notifier.changes.lock().unwrap().as_slice(), &[change]);
    }
}
