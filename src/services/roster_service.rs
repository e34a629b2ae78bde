//! Host and player membership: joins, lobby broadcasts and disconnect cleanup.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::{
    dao::locks::{LockKey, LockSet},
    dto::ws::ServerMessage,
    error::{ConflictKind, NotFoundKind, ServiceError},
    services::notifier::{StatusChange, notify_detached},
    state::{
        SharedState,
        lifecycle::{LifecycleEvent, SessionStatus, ensure_status},
        session::{ConnectionBinding, Player, Role},
    },
};

/// Longest pause between two disconnect cleanup attempts.
const DISCONNECT_MAX_BACKOFF: Duration = Duration::from_millis(250);

fn session_locks(code: &str, connection_id: &str) -> [LockKey; 3] {
    [
        LockKey::Session(code.into()),
        LockKey::Roster(code.into()),
        LockKey::Connection(connection_id.into()),
    ]
}

/// Bind `connection_id` as the host of session `code` and reset its roster.
pub async fn join_host(
    state: &SharedState,
    connection_id: &str,
    code: &str,
) -> Result<(), ServiceError> {
    let session = state
        .with_locks(session_locks(code, connection_id), || async {
            if state.repo().load_binding(connection_id).await?.is_some() {
                return Err(ServiceError::Conflict(ConflictKind::AlreadyBound));
            }

            let mut session = state
                .repo()
                .load_session(code)
                .await?
                .ok_or(ServiceError::NotFound(NotFoundKind::Game))?;
            if session.status.is_terminal() {
                return Err(ServiceError::InvalidState(format!(
                    "session is already {:?}",
                    session.status
                )));
            }
            if session.host_connection_id.is_some() {
                return Err(ServiceError::Conflict(ConflictKind::HostAlreadyJoined));
            }

            session.host_connection_id = Some(connection_id.to_owned());
            state.repo().save_session(&session).await?;
            state.repo().save_roster(code, &[]).await?;
            state
                .repo()
                .save_binding(
                    connection_id,
                    &ConnectionBinding {
                        session_code: code.to_owned(),
                        role: Role::Host,
                    },
                )
                .await?;
            Ok(session)
        })
        .await?;

    info!(code, connection_id, "host joined");
    let hub = state.hub();
    hub.join_room(code, connection_id);
    hub.send_to(
        connection_id,
        ServerMessage::HostJoined {
            code: session.code.clone(),
            session_id: session.session_id,
            question_count: session.quiz.len(),
        },
    );
    hub.send_to(connection_id, ServerMessage::lobby(&[]));
    Ok(())
}

/// Add a player to the lobby of session `code`.
pub async fn join_player(
    state: &SharedState,
    connection_id: &str,
    code: &str,
    nickname: &str,
) -> Result<(), ServiceError> {
    let (player, roster) = state
        .with_locks(session_locks(code, connection_id), || async {
            if state.repo().load_binding(connection_id).await?.is_some() {
                return Err(ServiceError::Conflict(ConflictKind::AlreadyBound));
            }

            let mut session = state
                .repo()
                .load_session(code)
                .await?
                .ok_or(ServiceError::NotFound(NotFoundKind::Game))?;
            if session.host_connection_id.is_none() {
                return Err(ServiceError::InvalidState(
                    "the host has not joined yet".into(),
                ));
            }
            ensure_status(&session, SessionStatus::Active)?;

            let mut roster = state.repo().load_roster(code).await?;
            if roster.iter().any(|player| player.nickname == nickname) {
                return Err(ServiceError::Conflict(ConflictKind::NicknameTaken));
            }

            let player = Player::new(
                connection_id.to_owned(),
                session.allocate_player_id(),
                nickname.to_owned(),
            );
            roster.push(player.clone());

            state.repo().save_session(&session).await?;
            state.repo().save_roster(code, &roster).await?;
            state
                .repo()
                .save_binding(
                    connection_id,
                    &ConnectionBinding {
                        session_code: code.to_owned(),
                        role: Role::Player,
                    },
                )
                .await?;
            Ok((player, roster))
        })
        .await?;

    info!(
        code,
        connection_id,
        player_id = player.player_id,
        nickname = %player.nickname,
        "player joined"
    );
    let hub = state.hub();
    hub.join_room(code, connection_id);
    hub.send_to(
        connection_id,
        ServerMessage::PlayerJoined {
            player_id: player.player_id,
            nickname: player.nickname,
        },
    );
    hub.broadcast(code, ServerMessage::lobby(&roster));
    Ok(())
}

/// Clean up after a socket closed.
///
/// Nobody is left to retry on contention, so this keeps trying until every lease held at the
/// time of the disconnect must have expired. Only then is `LockUnavailable` returned.
pub async fn handle_disconnect(state: &SharedState, connection_id: &str) -> Result<(), ServiceError> {
    let policy = state.config().lock_policy();
    let deadline = Instant::now() + policy.lease + policy.retry_delay;
    let mut backoff = policy.retry_delay.max(Duration::from_millis(1));
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match leave(state, connection_id).await {
            Err(ServiceError::LockUnavailable(err)) if Instant::now() < deadline => {
                debug!(connection_id, attempt, error = %err, "disconnect cleanup contended; retrying");
                sleep(backoff).await;
                backoff = (backoff * 2).min(DISCONNECT_MAX_BACKOFF);
            }
            Err(ServiceError::LockUnavailable(err)) => {
                // Stale leases are stealable by now, so one more pass settles it.
                warn!(connection_id, attempt, error = %err, "disconnect cleanup still contended after lease expiry");
                return leave(state, connection_id).await;
            }
            other => return other,
        }
    }
}

/// Role-dependent cleanup for a connection leaving its session.
pub async fn leave(state: &SharedState, connection_id: &str) -> Result<(), ServiceError> {
    let Some(binding) = state.repo().load_binding(connection_id).await? else {
        debug!(connection_id, "unbound connection left");
        return Ok(());
    };

    match binding.role {
        Role::Host => leave_host(state, connection_id, &binding.session_code).await,
        Role::Player => leave_player(state, connection_id, &binding.session_code).await,
    }
}

async fn leave_host(state: &SharedState, connection_id: &str, code: &str) -> Result<(), ServiceError> {
    let mut locks = state
        .lock_set([LockKey::Session(code.into()), LockKey::Roster(code.into())])
        .await?;
    let outcome = terminate_locked(state, &mut locks, connection_id, code).await;
    locks.release().await;

    let Some(change) = outcome? else {
        return Ok(());
    };

    let hub = state.hub();
    hub.broadcast_except(code, connection_id, ServerMessage::HostDisconnected);
    let evicted = hub.close_room(code);
    warn!(
        code,
        connection_id,
        evicted = evicted.len().saturating_sub(1),
        "host left; session terminated"
    );
    notify_detached(state.notifier(), change);
    Ok(())
}

/// Terminate the session if `connection_id` still hosts it, evicting every player.
///
/// Returns the status change to publish, or `None` when there was nothing to terminate.
async fn terminate_locked(
    state: &SharedState,
    locks: &mut LockSet,
    connection_id: &str,
    code: &str,
) -> Result<Option<StatusChange>, ServiceError> {
    let repo = state.repo();
    let session = repo
        .load_session(code)
        .await?
        .filter(|session| session.is_host(connection_id));
    let roster = match &session {
        Some(_) => repo.load_roster(code).await?,
        None => Vec::new(),
    };

    // Host and player connections are taken in one sorted batch.
    locks
        .extend(
            std::iter::once(connection_id.to_owned())
                .chain(roster.iter().map(|player| player.connection_id.clone()))
                .map(LockKey::Connection),
        )
        .await?;
    repo.delete_binding(connection_id).await?;

    let Some(mut session) = session else {
        return Ok(None);
    };
    if session.apply(LifecycleEvent::HostLeft).is_err() {
        // Already finished; the keys simply age out.
        return Ok(None);
    }

    for player in &roster {
        repo.delete_binding(&player.connection_id).await?;
    }
    repo.purge_session(code).await?;

    Ok(Some(StatusChange {
        session_id: session.session_id,
        quiz_id: session.quiz_id,
        code: session.code,
        status: session.status,
    }))
}

async fn leave_player(
    state: &SharedState,
    connection_id: &str,
    code: &str,
) -> Result<(), ServiceError> {
    let lobby = state
        .with_locks(session_locks(code, connection_id), || async {
            let repo = state.repo();
            repo.delete_binding(connection_id).await?;

            let Some(session) = repo.load_session(code).await? else {
                return Ok(None);
            };
            if session.status != SessionStatus::Active {
                // Mid-game players stay on the roster and score as absent.
                return Ok(None);
            }

            let mut roster = repo.load_roster(code).await?;
            roster.retain(|player| player.connection_id != connection_id);
            repo.save_roster(code, &roster).await?;
            Ok(Some(roster))
        })
        .await?;

    let hub = state.hub();
    hub.leave_room(code, connection_id);
    match lobby {
        Some(roster) => {
            info!(code, connection_id, "player left the lobby");
            hub.broadcast(code, ServerMessage::lobby(&roster));
        }
        None => info!(code, connection_id, "player disconnected"),
    }
    Ok(())
}
