//! Data transfer objects for the REST and WebSocket APIs.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::state::session::Millis;

/// Health check payloads.
pub mod health;
/// Session REST payloads.
pub mod session;
/// Shared validators.
pub mod validation;
/// WebSocket frames.
pub mod ws;

fn format_millis(millis: Millis) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
