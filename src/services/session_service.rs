//! Session creation, inspection and game start.

use rand::Rng;
use tracing::{info, warn};

use crate::{
    dao::locks::LockKey,
    dto::{
        session::{CreateSessionRequest, CreateSessionResponse, SessionSummary},
        validation::GAME_CODE_LEN,
        ws::ServerMessage,
    },
    error::{NotFoundKind, ServiceError},
    state::{
        SharedState,
        lifecycle::{LifecycleEvent, ensure_host},
        session::{GameSession, Question},
    },
};

/// Codes tried before giving up on finding a free one.
const CODE_ATTEMPTS: usize = 32;

/// Open a session around the quiz snapshot under a fresh numeric code.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<CreateSessionResponse, ServiceError> {
    let quiz_id = request.quiz_id;
    let quiz: Vec<Question> = request.questions.into_iter().map(Into::into).collect();

    for _ in 0..CODE_ATTEMPTS {
        let code = generate_code();
        let created = state
            .with_locks([LockKey::Session(code.clone())], || async {
                if state.repo().session_exists(&code).await? {
                    return Ok(None);
                }
                let session = GameSession::new(code.clone(), quiz_id.clone(), quiz.clone());
                state.repo().save_session(&session).await?;
                Ok(Some(session))
            })
            .await?;

        if let Some(session) = created {
            info!(
                code = %session.code,
                session_id = %session.session_id,
                questions = session.quiz.len(),
                "session created"
            );
            return Ok(CreateSessionResponse {
                session_id: session.session_id,
                code: session.code,
            });
        }
    }

    warn!(attempts = CODE_ATTEMPTS, "no free game code found");
    Err(ServiceError::InvalidState(
        "could not allocate a free game code".into(),
    ))
}

/// Read-only summary of a live session.
pub async fn summary(state: &SharedState, code: &str) -> Result<SessionSummary, ServiceError> {
    let session = state
        .repo()
        .load_session(code)
        .await?
        .ok_or(ServiceError::NotFound(NotFoundKind::Game))?;
    let roster = state.repo().load_roster(code).await?;
    Ok(SessionSummary::new(&session, roster.len()))
}

/// Move the lobby into the question cycle. Host only; needs at least one player.
pub async fn start_game(
    state: &SharedState,
    connection_id: &str,
    code: &str,
) -> Result<(), ServiceError> {
    let question_count = state
        .with_locks(
            [LockKey::Session(code.into()), LockKey::Roster(code.into())],
            || async {
                let mut session = state
                    .repo()
                    .load_session(code)
                    .await?
                    .ok_or(ServiceError::NotFound(NotFoundKind::Game))?;
                ensure_host(&session, connection_id)?;

                let roster = state.repo().load_roster(code).await?;
                session.apply(LifecycleEvent::HostStarted {
                    roster_size: roster.len(),
                })?;
                state.repo().save_session(&session).await?;
                Ok(session.quiz.len())
            },
        )
        .await?;

    info!(code, question_count, "game started");
    state
        .hub()
        .broadcast(code, ServerMessage::GameStarted { question_count });
    Ok(())
}

fn generate_code() -> String {
    let upper = 10u32.pow(GAME_CODE_LEN as u32);
    format!(
        "{:0width$}",
        rand::rng().random_range(0..upper),
        width = GAME_CODE_LEN
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dto::validation::validate_game_code,
        state::{AppState, lifecycle::SessionStatus},
    };

    fn request() -> CreateSessionRequest {
        serde_json::from_str(
            r#"{"quiz_id":"geo","questions":[
                {"id":"q1","kind":"single","prompt":"?",
                 "choices":[{"id":"a","label":"A"}],"correct_answers":["a"]}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..100 {
            assert!(validate_game_code(&generate_code()).is_ok());
        }
    }

    #[tokio::test]
    async fn created_session_is_active_and_summarized() {
        let state = AppState::in_memory(AppConfig::default());
        let created = create_session(&state, request()).await.unwrap();

        let summary = summary(&state, &created.code).await.unwrap();
        assert_eq!(summary.session_id, created.session_id);
        assert_eq!(summary.status, SessionStatus::Active);
        assert_eq!(summary.question_count, 1);
        assert_eq!(summary.player_count, 0);
        assert!(!summary.host_connected);
    }

    #[tokio::test]
    async fn summary_of_unknown_code_is_not_found() {
        let state = AppState::in_memory(AppConfig::default());
        let err = summary(&state, "000000").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(NotFoundKind::Game)));
    }

    #[tokio::test]
    async fn start_requires_host_and_players() {
        let state = AppState::in_memory(AppConfig::default());
        let created = create_session(&state, request()).await.unwrap();
        let mut session = state
            .repo()
            .load_session(&created.code)
            .await
            .unwrap()
            .unwrap();
        session.host_connection_id = Some("host".into());
        state.repo().save_session(&session).await.unwrap();

        let err = start_game(&state, "intruder", &created.code)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotHost));

        let err = start_game(&state, "host", &created.code).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert_eq!(state.lock_manager().outstanding(), 0);
    }
}
