//! Session lifecycle: statuses, the transition table and handler preconditions.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::session::GameSession;

/// Lifecycle states of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Lobby open: players may join and the host may start.
    Active,
    /// Question cycle running; joining is closed.
    Started,
    /// Every question was played.
    Completed,
    /// The host left before the end.
    Terminated,
}

impl SessionStatus {
    /// Whether no further transition can leave this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Terminated)
    }
}

/// Events that can move a session through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Host asked to start the game.
    HostStarted {
        /// Players on the roster at that moment.
        roster_size: usize,
    },
    /// The requested question index is past the end of the quiz.
    QuestionsExhausted,
    /// The host connection dropped.
    HostLeft,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The status the session was in when the event was received.
    pub from: SessionStatus,
    /// The event that cannot be applied from this status.
    pub event: LifecycleEvent,
}

/// Reasons a lifecycle transition is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The event is not valid from the current status.
    #[error(transparent)]
    Invalid(#[from] InvalidTransition),
    /// Starting requires at least one player.
    #[error("cannot start a game without players")]
    EmptyRoster,
}

/// The single authoritative transition table.
pub fn transition(
    from: SessionStatus,
    event: LifecycleEvent,
) -> Result<SessionStatus, TransitionError> {
    let next = match (from, event) {
        (SessionStatus::Active, LifecycleEvent::HostStarted { roster_size: 0 }) => {
            return Err(TransitionError::EmptyRoster);
        }
        (SessionStatus::Active, LifecycleEvent::HostStarted { .. }) => SessionStatus::Started,
        (SessionStatus::Started, LifecycleEvent::QuestionsExhausted) => SessionStatus::Completed,
        (SessionStatus::Active | SessionStatus::Started, LifecycleEvent::HostLeft) => {
            SessionStatus::Terminated
        }
        (from, event) => return Err(InvalidTransition { from, event }.into()),
    };

    Ok(next)
}

/// Precondition failures shared by every handler before it mutates a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// The caller is not the bound host.
    #[error("only the host may perform this action")]
    NotHost,
    /// The session is in the wrong lifecycle status.
    #[error("operation requires status {expected:?} but session is {actual:?}")]
    WrongStatus {
        /// Status the operation needs.
        expected: SessionStatus,
        /// Status the session is in.
        actual: SessionStatus,
    },
}

/// Reject callers that are not the bound host.
pub fn ensure_host(session: &GameSession, connection_id: &str) -> Result<(), GuardError> {
    if session.is_host(connection_id) {
        Ok(())
    } else {
        Err(GuardError::NotHost)
    }
}

/// Reject operations attempted outside of `expected`.
pub fn ensure_status(session: &GameSession, expected: SessionStatus) -> Result<(), GuardError> {
    if session.status == expected {
        Ok(())
    } else {
        Err(GuardError::WrongStatus {
            expected,
            actual: session.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_happy_path_through_game() {
        let started = transition(
            SessionStatus::Active,
            LifecycleEvent::HostStarted { roster_size: 3 },
        )
        .unwrap();
        assert_eq!(started, SessionStatus::Started);

        assert_eq!(
            transition(started, LifecycleEvent::QuestionsExhausted).unwrap(),
            SessionStatus::Completed
        );
    }

    #[test]
    fn start_requires_players() {
        assert_eq!(
            transition(
                SessionStatus::Active,
                LifecycleEvent::HostStarted { roster_size: 0 }
            ),
            Err(TransitionError::EmptyRoster)
        );
    }

    #[test]
    fn host_leaving_terminates_live_sessions() {
        for from in [SessionStatus::Active, SessionStatus::Started] {
            assert_eq!(
                transition(from, LifecycleEvent::HostLeft).unwrap(),
                SessionStatus::Terminated
            );
        }
    }

    #[test]
    fn terminal_states_never_move() {
        for from in [SessionStatus::Completed, SessionStatus::Terminated] {
            for event in [
                LifecycleEvent::HostStarted { roster_size: 1 },
                LifecycleEvent::QuestionsExhausted,
                LifecycleEvent::HostLeft,
            ] {
                let err = transition(from, event).unwrap_err();
                assert_eq!(
                    err,
                    TransitionError::Invalid(InvalidTransition { from, event })
                );
            }
        }
    }

    #[test]
    fn status_never_goes_backwards() {
        let err = transition(
            SessionStatus::Started,
            LifecycleEvent::HostStarted { roster_size: 2 },
        )
        .unwrap_err();
        match err {
            TransitionError::Invalid(invalid) => {
                assert_eq!(invalid.from, SessionStatus::Started);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(transition(SessionStatus::Active, LifecycleEvent::QuestionsExhausted).is_err());
    }

    #[test]
    fn guards_report_mismatches() {
        let mut session = GameSession::new("1".into(), "quiz".into(), Vec::new());
        session.host_connection_id = Some("host".into());

        assert!(ensure_host(&session, "host").is_ok());
        assert_eq!(ensure_host(&session, "intruder"), Err(GuardError::NotHost));
        assert_eq!(
            ensure_status(&session, SessionStatus::Started),
            Err(GuardError::WrongStatus {
                expected: SessionStatus::Started,
                actual: SessionStatus::Active,
            })
        );
    }
}
