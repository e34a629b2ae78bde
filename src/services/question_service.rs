//! Question cycle: release, collect answers, close and score, advance.

use std::{collections::HashMap, time::Duration};

use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    dao::locks::{LockKey, LockSet},
    dto::ws::{PlayerResult, QuestionView, ServerMessage, StatisticView},
    error::{ConflictKind, NotFoundKind, ServiceError},
    services::{
        history_service,
        notifier::{StatusChange, notify_detached},
    },
    state::{
        SharedState,
        lifecycle::{LifecycleEvent, SessionStatus, ensure_host, ensure_status},
        scoring::{self, PlayerOutcome, QuestionStatistic},
        session::{GameSession, Millis, PendingAnswer, QuestionCursor, now_millis},
    },
};

/// Who asked for a question to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closer<'a> {
    /// The bound host connection.
    Host(&'a str),
    /// The per-question time limit elapsed.
    Timer,
}

/// Answer submission as received from a player.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Question being answered.
    pub question_index: usize,
    /// Raw answer.
    pub answer: Vec<String>,
    /// Client timestamp.
    pub submitted_at: Millis,
    /// Minutes the client clock runs ahead.
    pub clock_offset_minutes: i32,
}

enum Released {
    Question {
        session: GameSession,
        cursor: QuestionCursor,
    },
    Finished(StatusChange),
}

/// Open question `index` after a `delay_seconds` countdown, or end the game past the last one.
pub async fn release_question(
    state: &SharedState,
    connection_id: &str,
    code: &str,
    index: usize,
    delay_seconds: u32,
) -> Result<(), ServiceError> {
    let min_delay = state.config().min_question_delay_secs();
    if delay_seconds < min_delay {
        return Err(ServiceError::InvalidInput(format!(
            "delay must be at least {min_delay} seconds"
        )));
    }

    let released = state
        .with_locks([LockKey::Session(code.into())], || async {
            let mut session = state
                .repo()
                .load_session(code)
                .await?
                .ok_or(ServiceError::NotFound(NotFoundKind::Game))?;
            ensure_host(&session, connection_id)?;
            ensure_status(&session, SessionStatus::Started)?;

            if let Some(cursor) = session.current_question {
                if !cursor.closed {
                    return Err(ServiceError::InvalidState(format!(
                        "question {} is still open",
                        cursor.index
                    )));
                }
                if index <= cursor.index {
                    return Err(ServiceError::InvalidState(format!(
                        "question {index} was already played"
                    )));
                }
            }

            if index >= session.quiz.len() {
                session.apply(LifecycleEvent::QuestionsExhausted)?;
                state.repo().save_session(&session).await?;
                return Ok(Released::Finished(StatusChange {
                    session_id: session.session_id,
                    quiz_id: session.quiz_id.clone(),
                    code: session.code.clone(),
                    status: session.status,
                }));
            }

            let cursor = QuestionCursor {
                index,
                release_time: now_millis() + i64::from(delay_seconds) * 1_000,
                closed: false,
            };
            session.current_question = Some(cursor);
            state.repo().save_session(&session).await?;
            Ok(Released::Question { session, cursor })
        })
        .await?;

    let hub = state.hub();
    match released {
        Released::Finished(change) => {
            info!(code, session_id = %change.session_id, "all questions played; game completed");
            hub.broadcast(
                code,
                ServerMessage::GameEnded {
                    session_id: change.session_id,
                },
            );
            notify_detached(state.notifier(), change);
        }
        Released::Question { session, cursor } => {
            let Some(question) = session.question(index) else {
                return Err(ServiceError::NotFound(NotFoundKind::Question));
            };
            info!(code, question_index = index, release_time = cursor.release_time, "question released");

            hub.broadcast_except(
                code,
                connection_id,
                ServerMessage::QuestionReleased {
                    question_index: index,
                    question: QuestionView::redacted(question),
                    release_time: cursor.release_time,
                },
            );
            hub.send_to(
                connection_id,
                ServerMessage::QuestionReleased {
                    question_index: index,
                    question: QuestionView::full(question),
                    release_time: cursor.release_time,
                },
            );

            if let Some(limit) = question.time_limit_seconds {
                spawn_close_timer(state.clone(), code.to_owned(), cursor, limit);
            }
        }
    }
    Ok(())
}

/// Close question `cursor.index` on its own once its time limit has elapsed.
fn spawn_close_timer(state: SharedState, code: String, cursor: QuestionCursor, limit: u32) {
    let closes_at = cursor.release_time + i64::from(limit) * 1_000;
    let wait = Duration::from_millis(u64::try_from(closes_at - now_millis()).unwrap_or(0));
    tokio::spawn(async move {
        sleep(wait).await;
        match close_question(&state, Closer::Timer, &code, cursor.index).await {
            Ok(_) => info!(code = %code, question_index = cursor.index, "question closed by timer"),
            Err(ServiceError::Conflict(ConflictKind::QuestionClosed)) => {
                debug!(code = %code, question_index = cursor.index, "timer found question already closed")
            }
            Err(err) => {
                warn!(code = %code, question_index = cursor.index, error = %err, "timer failed to close question")
            }
        }
    });
}

/// Record a player's first answer for the open question.
pub async fn submit_answer(
    state: &SharedState,
    connection_id: &str,
    code: &str,
    submission: Submission,
) -> Result<(), ServiceError> {
    let index = submission.question_index;
    let (player_id, pending) = state
        .with_locks([LockKey::Connection(connection_id.into())], || async {
            let repo = state.repo();
            let session = repo
                .load_session(code)
                .await?
                .ok_or(ServiceError::NotFound(NotFoundKind::Game))?;
            ensure_status(&session, SessionStatus::Started)?;
            if session.question(index).is_none() {
                return Err(ServiceError::NotFound(NotFoundKind::Question));
            }

            let roster = repo.load_roster(code).await?;
            let player = roster
                .iter()
                .find(|player| player.connection_id == connection_id)
                .ok_or(ServiceError::NotFound(NotFoundKind::Player))?;

            let cursor = match session.current_question {
                Some(cursor) if cursor.accepts(index) => cursor,
                _ => return Err(ServiceError::Conflict(ConflictKind::QuestionClosed)),
            };

            if let Some(existing) = repo.load_pending(code, connection_id).await? {
                if existing.question_index == index {
                    return Err(ServiceError::AlreadyAnswered(Box::new(existing)));
                }
            }

            let pending = PendingAnswer::new(
                index,
                submission.answer,
                submission.submitted_at,
                submission.clock_offset_minutes,
                cursor.release_time,
            );
            repo.save_pending(code, connection_id, &pending).await?;
            Ok((player.player_id, pending))
        })
        .await?;

    debug!(
        code,
        connection_id,
        player_id,
        question_index = index,
        elapsed_seconds = pending.elapsed_seconds,
        "answer accepted"
    );
    let hub = state.hub();
    hub.send_to(
        connection_id,
        ServerMessage::AnswerAccepted {
            question_index: index,
            submitted_at: pending.submitted_at,
        },
    );
    hub.broadcast(
        code,
        ServerMessage::AnswerAcknowledged {
            player_id,
            submitted_at: pending.submitted_at,
        },
    );
    Ok(())
}

struct Closed {
    session: GameSession,
    question_id: String,
    correct_answers: Vec<String>,
    outcomes: Vec<PlayerOutcome>,
    statistic: QuestionStatistic,
}

/// Close the open question, score it and broadcast results.
///
/// Returns the handle of the detached history write.
pub async fn close_question(
    state: &SharedState,
    closer: Closer<'_>,
    code: &str,
    index: usize,
) -> Result<JoinHandle<()>, ServiceError> {
    let mut locks = state
        .lock_set([LockKey::Session(code.into()), LockKey::Roster(code.into())])
        .await?;
    let outcome = close_locked(state, &mut locks, closer, code, index).await;
    locks.release().await;
    let closed = outcome?;

    info!(
        code,
        question_index = index,
        answered = closed.statistic.answered,
        correct = closed.statistic.correct,
        "question closed"
    );

    let hub = state.hub();
    if let Some(host) = closed.session.host_connection_id.as_deref() {
        hub.send_to(
            host,
            ServerMessage::QuestionHostResult {
                question_index: index,
                correct_answers: closed.correct_answers,
                statistic: StatisticView::from(closed.statistic),
            },
        );
    }
    hub.broadcast(
        code,
        ServerMessage::QuestionPlayerResult {
            question_index: index,
            results: closed.outcomes.iter().map(PlayerResult::from).collect(),
        },
    );

    let batch = history_service::build_batch(
        closed.session.session_id,
        &closed.question_id,
        &closed.outcomes,
    );
    Ok(history_service::record_detached(state.clone(), batch))
}

async fn close_locked(
    state: &SharedState,
    locks: &mut LockSet,
    closer: Closer<'_>,
    code: &str,
    index: usize,
) -> Result<Closed, ServiceError> {
    let repo = state.repo();
    let mut session = repo
        .load_session(code)
        .await?
        .ok_or(ServiceError::NotFound(NotFoundKind::Game))?;
    if let Closer::Host(connection_id) = closer {
        ensure_host(&session, connection_id)?;
    }
    ensure_status(&session, SessionStatus::Started)?;
    let question = session
        .question(index)
        .cloned()
        .ok_or(ServiceError::NotFound(NotFoundKind::Question))?;

    let mut cursor = match session.current_question {
        Some(cursor) if cursor.index == index => cursor,
        _ => {
            return Err(ServiceError::InvalidState(format!(
                "question {index} is not the current question"
            )));
        }
    };
    if cursor.closed {
        return Err(ServiceError::Conflict(ConflictKind::QuestionClosed));
    }

    let roster = repo.load_roster(code).await?;
    locks
        .extend(
            roster
                .iter()
                .map(|player| LockKey::Connection(player.connection_id.clone())),
        )
        .await?;

    let mut submissions = HashMap::new();
    for player in &roster {
        if let Some(pending) = repo.load_pending(code, &player.connection_id).await? {
            submissions.insert(player.connection_id.clone(), pending);
        }
    }

    let sheet = scoring::score(
        &roster,
        &submissions,
        index,
        &question,
        state.config().scoring(),
    );

    // Scores land before the question is marked closed, so a failed write leaves it retryable.
    repo.save_roster(code, &sheet.players).await?;
    cursor.closed = true;
    session.current_question = Some(cursor);
    if let Err(err) = repo.save_session(&session).await {
        if let Err(rollback) = repo.save_roster(code, &roster).await {
            warn!(code, question_index = index, error = %rollback, "failed to restore roster after close failure");
        }
        return Err(err.into());
    }

    // Leftovers are keyed to this index and ignored by later questions.
    if let Err(err) = clear_pending(state, code).await {
        warn!(code, question_index = index, error = %err, "failed to clear pending answers");
    }

    Ok(Closed {
        session,
        question_id: question.id,
        correct_answers: question.correct_answers,
        outcomes: sheet.outcomes,
        statistic: sheet.statistic,
    })
}

async fn clear_pending(state: &SharedState, code: &str) -> Result<(), ServiceError> {
    let repo = state.repo();
    for connection_id in repo.pending_connections(code).await? {
        repo.delete_pending(code, &connection_id).await?;
    }
    Ok(())
}

/// Tell clients to show the lobby state of the next question.
pub async fn proceed_to_next(
    state: &SharedState,
    connection_id: &str,
    code: &str,
    index: usize,
) -> Result<(), ServiceError> {
    let session = state
        .repo()
        .load_session(code)
        .await?
        .ok_or(ServiceError::NotFound(NotFoundKind::Game))?;
    ensure_host(&session, connection_id)?;
    ensure_status(&session, SessionStatus::Started)?;
    if session
        .current_question
        .is_some_and(|cursor| !cursor.closed)
    {
        return Err(ServiceError::InvalidState(
            "close the current question first".into(),
        ));
    }

    info!(code, question_index = index, "advancing to next question");
    state
        .hub()
        .broadcast(code, ServerMessage::NextQuestion { question_index: index });
    Ok(())
}
