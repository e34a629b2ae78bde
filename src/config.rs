//! Application-level configuration loading: scoring rules, lock tuning and session lifetime.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{dao::locks::LockPolicy, state::scoring::ScoringRules};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_LIVE_CONFIG_PATH";

const DEFAULT_SESSION_TTL_SECS: u64 = 7_200;
const DEFAULT_LOCK_LEASE_MS: u64 = 5_000;
const DEFAULT_LOCK_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_LOCK_RETRY_DELAY_MS: u64 = 20;
const DEFAULT_MIN_QUESTION_DELAY_SECS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    scoring: ScoringRules,
    session_ttl: Duration,
    lock_policy: LockPolicy,
    min_question_delay_secs: u32,
    status_webhook_url: Option<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        session_ttl_secs = app_config.session_ttl.as_secs(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Scoring formula tunables.
    pub fn scoring(&self) -> &ScoringRules {
        &self.scoring
    }

    /// Lifetime of every ephemeral session record, refreshed on each write.
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Lease and retry budget for every lock set.
    pub fn lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    /// Shortest countdown a host may request before a question opens.
    pub fn min_question_delay_secs(&self) -> u32 {
        self.min_question_delay_secs
    }

    /// Where status changes are posted, when configured.
    pub fn status_webhook_url(&self) -> Option<&str> {
        self.status_webhook_url.as_deref()
    }

    /// Replace the lock policy, mostly useful for tests that provoke contention.
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    scoring: ScoringRules,
    session_ttl_secs: u64,
    lock_lease_ms: u64,
    lock_retry_attempts: u32,
    lock_retry_delay_ms: u64,
    min_question_delay_secs: u32,
    status_webhook_url: Option<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringRules::default(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            lock_lease_ms: DEFAULT_LOCK_LEASE_MS,
            lock_retry_attempts: DEFAULT_LOCK_RETRY_ATTEMPTS,
            lock_retry_delay_ms: DEFAULT_LOCK_RETRY_DELAY_MS,
            min_question_delay_secs: DEFAULT_MIN_QUESTION_DELAY_SECS,
            status_webhook_url: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            scoring: value.scoring,
            session_ttl: Duration::from_secs(value.session_ttl_secs.max(1)),
            lock_policy: LockPolicy {
                lease: Duration::from_millis(value.lock_lease_ms.max(1)),
                attempts: value.lock_retry_attempts.max(1),
                retry_delay: Duration::from_millis(value.lock_retry_delay_ms),
            },
            min_question_delay_secs: value.min_question_delay_secs,
            status_webhook_url: value.status_webhook_url.filter(|url| !url.trim().is_empty()),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
