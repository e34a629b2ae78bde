use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, LocalBoxFuture, join_all};
use quiz_live_back::config::AppConfig;
use quiz_live_back::dao::ephemeral::MemoryStore;
use quiz_live_back::dao::locks::{LockPolicy, MemoryLockManager};
use quiz_live_back::dto::session::{CreateSessionRequest, QuestionInput};
use quiz_live_back::dto::ws::{
    AnswerSubmitPayload, ClientMessage, ErrorCode, GameCodePayload, GetQuestionPayload,
    PlayerJoinPayload, PlayerResult, QuestionPayload, ServerMessage,
};
use quiz_live_back::services::handlers::handle_message;
use quiz_live_back::services::notifier::{NotifyError, StatusChange, StatusNotifier};
use quiz_live_back::services::{roster_service, session_service};
use quiz_live_back::state::lifecycle::SessionStatus;
use quiz_live_back::state::session::{Choice, QuestionKind};
use quiz_live_back::state::{AppState, SharedState};
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingNotifier {
    changes: Mutex<Vec<StatusChange>>,
}

impl StatusNotifier for RecordingNotifier {
    fn notify(&self, change: StatusChange) -> BoxFuture<'static, Result<(), NotifyError>> {
        self.changes.lock().unwrap().push(change);
        Box::pin(async { Ok(()) })
    }
}

impl RecordingNotifier {
    fn count(&self, status: SessionStatus) -> usize {
        self.changes
            .lock()
            .unwrap()
            .iter()
            .filter(|change| change.status == status)
            .count()
    }
}

/// A registered socket whose outbound frames are captured.
struct Client {
    id: String,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Client {
    fn connect(state: &SharedState, id: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        state.hub().register(id, tx);
        Self { id: id.to_owned(), rx }
    }

    fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

fn question(id: &str) -> QuestionInput {
    QuestionInput {
        id: id.into(),
        kind: QuestionKind::Single,
        prompt: format!("question {id}"),
        choices: vec![
            Choice {
                id: "a".into(),
                label: "A".into(),
            },
            Choice {
                id: "b".into(),
                label: "B".into(),
            },
        ],
        correct_answers: vec!["a".into()],
        time_limit_seconds: None,
    }
}

fn setup() -> (SharedState, Arc<RecordingNotifier>) {
    setup_with(AppConfig::default())
}

fn setup_with(config: AppConfig) -> (SharedState, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLockManager::new()),
        notifier.clone(),
    );
    (state, notifier)
}

async fn create(state: &SharedState, questions: usize) -> String {
    let request = CreateSessionRequest {
        quiz_id: "geography".into(),
        questions: (0..questions).map(|i| question(&format!("q{i}"))).collect(),
    };
    session_service::create_session(state, request)
        .await
        .expect("session should be created")
        .code
}

async fn send(state: &SharedState, client: &Client, message: ClientMessage) {
    handle_message(state, &client.id, message).await;
}

fn game_code(code: &str) -> GameCodePayload {
    GameCodePayload {
        game_code: code.to_owned(),
    }
}

fn submit(code: &str, index: usize, answer: &str, submitted_at: i64) -> ClientMessage {
    ClientMessage::AnswerSubmit(AnswerSubmitPayload {
        game_code: code.to_owned(),
        question_index: index,
        answer: vec![answer.to_owned()],
        submitted_at,
        clock_offset_minutes: 0,
    })
}

fn release(code: &str, index: usize) -> ClientMessage {
    ClientMessage::HostGetQuestion(GetQuestionPayload {
        game_code: code.to_owned(),
        question_index: index,
        delay_seconds: 5,
    })
}

fn next(code: &str, index: usize) -> ClientMessage {
    ClientMessage::ProceedToNext(QuestionPayload {
        game_code: code.to_owned(),
        question_index: index,
    })
}

fn end(code: &str, index: usize) -> ClientMessage {
    ClientMessage::QuestionEnd(QuestionPayload {
        game_code: code.to_owned(),
        question_index: index,
    })
}

/// Host `h` plus one player per nickname, all joined to a fresh session.
async fn lobby(state: &SharedState, questions: usize, nicknames: &[&str]) -> (String, Client, Vec<Client>) {
    let code = create(state, questions).await;
    let host = Client::connect(state, "h");
    send(state, &host, ClientMessage::HostJoin(game_code(&code))).await;

    let mut players = Vec::new();
    for (i, nickname) in nicknames.iter().enumerate() {
        let player = Client::connect(state, &format!("p{i}"));
        send(
            state,
            &player,
            ClientMessage::PlayerJoin(PlayerJoinPayload {
                game_code: code.clone(),
                nickname: (*nickname).to_owned(),
            }),
        )
        .await;
        players.push(player);
    }
    (code, host, players)
}

async fn release_time(state: &SharedState, code: &str) -> i64 {
    state
        .repo()
        .load_session(code)
        .await
        .unwrap()
        .unwrap()
        .current_question_release_time()
        .unwrap()
}

fn player_results(messages: &[ServerMessage]) -> Vec<PlayerResult> {
    messages
        .iter()
        .find_map(|message| match message {
            ServerMessage::QuestionPlayerResult { results, .. } => Some(results.clone()),
            _ => None,
        })
        .expect("expected a QuestionPlayerResult")
}

#[tokio::test]
async fn test_concurrent_host_joins_bind_a_single_host() {
    let (state, _) = setup();
    let code = create(&state, 1).await;
    let mut hosts: Vec<Client> = (0..8)
        .map(|i| Client::connect(&state, &format!("host-{i}")))
        .collect();

    join_all(
        hosts
            .iter()
            .map(|host| send(&state, host, ClientMessage::HostJoin(game_code(&code)))),
    )
    .await;

    let mut joined = 0;
    for host in &mut hosts {
        for message in host.drain() {
            match message {
                ServerMessage::HostJoined { .. } => joined += 1,
                ServerMessage::Error { code, .. } => {
                    assert!(matches!(code, ErrorCode::HostAlreadyJoined | ErrorCode::Busy))
                }
                _ => {}
            }
        }
    }
    assert_eq!(joined, 1);

    let session = state.repo().load_session(&code).await.unwrap().unwrap();
    assert!(session.host_connection_id.is_some());
    assert_eq!(state.lock_manager().outstanding(), 0);
}

#[tokio::test]
async fn test_duplicate_nickname_is_rejected() {
    let (state, _) = setup();
    let (code, _host, _players) = lobby(&state, 1, &["ada"]).await;

    let mut copycat = Client::connect(&state, "copycat");
    send(
        &state,
        &copycat,
        ClientMessage::PlayerJoin(PlayerJoinPayload {
            game_code: code.clone(),
            nickname: "ada".into(),
        }),
    )
    .await;

    match copycat.drain().as_slice() {
        [ServerMessage::Error { code, .. }] => assert_eq!(*code, ErrorCode::NicknameTaken),
        other => panic!("unexpected messages {other:?}"),
    }
    let roster = state.repo().load_roster(&code).await.unwrap();
    assert_eq!(roster.len(), 1);
    assert!(state.repo().load_binding("copycat").await.unwrap().is_none());
}

#[tokio::test]
async fn test_first_submission_wins() {
    let (state, _) = setup();
    let (code, host, mut players) = lobby(&state, 1, &["ada"]).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;
    send(&state, &host, release(&code, 0)).await;
    let at = release_time(&state, &code).await;
    players[0].drain();

    send(&state, &players[0], submit(&code, 0, "b", at + 500)).await;
    send(&state, &players[0], submit(&code, 0, "a", at + 900)).await;

    let messages = players[0].drain();
    assert!(messages.iter().any(|message| matches!(
        message,
        ServerMessage::AnswerAccepted { question_index: 0, .. }
    )));
    let echoed = messages.iter().find_map(|message| match message {
        ServerMessage::AnswerAlreadySubmitted { answer, .. } => Some(answer.clone()),
        _ => None,
    });
    assert_eq!(echoed, Some(vec!["b".to_string()]));

    let pending = state.repo().load_pending(&code, &players[0].id).await.unwrap().unwrap();
    assert_eq!(pending.raw_answer, vec!["b".to_string()]);
}

#[tokio::test]
async fn test_two_correct_answers_score_110_and_60() {
    let (state, notifier) = setup();
    let (code, mut host, mut players) = lobby(&state, 1, &["ada", "bob"]).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;
    send(&state, &host, release(&code, 0)).await;
    let at = release_time(&state, &code).await;

    send(&state, &players[1], submit(&code, 0, "a", at + 1_000)).await;
    send(&state, &players[0], submit(&code, 0, "a", at + 3_000)).await;
    host.drain();
    players[0].drain();

    send(&state, &host, end(&code, 0)).await;

    let results = player_results(&players[0].drain());
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].nickname, "bob");
    assert_eq!((results[0].points, results[0].rank), (110, 1));
    assert_eq!(results[1].nickname, "ada");
    assert_eq!((results[1].points, results[1].rank), (60, 2));
    assert_eq!(results[1].elapsed_seconds, Some(3.0));

    let host_messages = host.drain();
    assert!(host_messages.iter().any(|message| matches!(
        message,
        ServerMessage::QuestionHostResult { statistic, .. } if statistic.correct == 2
    )));

    // Releasing past the last question completes the game.
    send(&state, &host, release(&code, 1)).await;
    assert!(host
        .drain()
        .iter()
        .any(|message| matches!(message, ServerMessage::GameEnded { .. })));
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(notifier.count(SessionStatus::Completed), 1);
}

#[tokio::test]
async fn test_scores_never_decrease_and_ranks_are_a_permutation() {
    let (state, _) = setup();
    let (code, host, mut players) = lobby(&state, 3, &["ada", "bob", "cy"]).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;

    let answers = [["a", "b", "a"], ["b", "a", "a"], ["a", "a", "b"]];
    let mut previous = vec![0u64; players.len()];

    for (index, round) in answers.iter().enumerate() {
        send(&state, &host, release(&code, index)).await;
        let at = release_time(&state, &code).await;
        for (i, answer) in round.iter().enumerate() {
            send(&state, &players[i], submit(&code, index, answer, at + 1_000 * (i as i64 + 1))).await;
        }
        players[0].drain();
        send(&state, &host, end(&code, index)).await;
        let results = player_results(&players[0].drain());

        let mut ranks: Vec<u32> = results.iter().map(|result| result.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));

        let roster = state.repo().load_roster(&code).await.unwrap();
        for (i, player) in roster.iter().enumerate() {
            assert!(player.score >= previous[i]);
            previous[i] = player.score;
        }

        send(
            &state,
            &host,
            ClientMessage::ProceedToNext(QuestionPayload {
                game_code: code.clone(),
                question_index: index + 1,
            }),
        )
        .await;
    }
}

#[tokio::test]
async fn test_concurrent_submissions_leave_no_locks_behind() {
    let (state, _) = setup();
    let nicknames: Vec<String> = (0..12).map(|i| format!("player{i}")).collect();
    let nickname_refs: Vec<&str> = nicknames.iter().map(String::as_str).collect();
    let (code, host, players) = lobby(&state, 1, &nickname_refs).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;
    send(&state, &host, release(&code, 0)).await;
    let at = release_time(&state, &code).await;

    join_all(players.iter().flat_map(|player| {
        [
            send(&state, player, submit(&code, 0, "a", at + 100)),
            send(&state, player, submit(&code, 0, "b", at + 200)),
        ]
    }))
    .await;

    assert_eq!(state.lock_manager().outstanding(), 0);
    assert_eq!(
        state.repo().pending_connections(&code).await.unwrap().len(),
        players.len()
    );
}

#[tokio::test]
async fn test_player_disconnect_mid_game_scores_as_absent() {
    let (state, _) = setup();
    let (code, host, mut players) = lobby(&state, 1, &["ada", "bob"]).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;
    send(&state, &host, release(&code, 0)).await;
    let at = release_time(&state, &code).await;
    send(&state, &players[0], submit(&code, 0, "a", at + 1_000)).await;

    roster_service::handle_disconnect(&state, &players[1].id).await.unwrap();
    state.hub().unregister(&players[1].id);
    players[0].drain();

    send(&state, &host, end(&code, 0)).await;

    let results = player_results(&players[0].drain());
    assert_eq!(results.len(), 2);
    let absent = results.iter().find(|result| result.nickname == "bob").unwrap();
    assert!(!absent.answered);
    assert_eq!(absent.points, 0);
    assert!(state.repo().load_binding(&players[1].id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_host_disconnect_terminates_session_once() {
    let (state, notifier) = setup();
    let (code, host, mut players) = lobby(&state, 2, &["ada", "bob"]).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;
    for player in &mut players {
        player.drain();
    }

    roster_service::handle_disconnect(&state, &host.id).await.unwrap();
    roster_service::handle_disconnect(&state, &host.id).await.unwrap();
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    for player in &mut players {
        assert!(player
            .drain()
            .iter()
            .any(|message| matches!(message, ServerMessage::HostDisconnected)));
        assert!(state.repo().load_binding(&player.id).await.unwrap().is_none());
    }
    assert!(state.repo().load_session(&code).await.unwrap().is_none());
    assert!(state.repo().load_roster(&code).await.unwrap().is_empty());
    assert!(state.repo().load_binding(&host.id).await.unwrap().is_none());
    assert_eq!(notifier.count(SessionStatus::Terminated), 1);
    assert_eq!(state.lock_manager().outstanding(), 0);
}

#[tokio::test]
async fn test_submissions_racing_close_are_either_scored_or_rejected() {
    let (state, _) = setup();
    let nicknames: Vec<String> = (0..8).map(|i| format!("player{i}")).collect();
    let nickname_refs: Vec<&str> = nicknames.iter().map(String::as_str).collect();
    let (code, mut host, mut players) = lobby(&state, 1, &nickname_refs).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;
    send(&state, &host, release(&code, 0)).await;
    let at = release_time(&state, &code).await;
    host.drain();
    for player in &mut players {
        player.drain();
    }

    let mut racers: Vec<LocalBoxFuture<'_, ()>> = players
        .iter()
        .map(|player| send(&state, player, submit(&code, 0, "a", at + 1_000)).boxed_local())
        .collect();
    racers.insert(players.len() / 2, send(&state, &host, end(&code, 0)).boxed_local());
    join_all(racers).await;

    // The close itself may have lost a lock race; retry until it lands.
    let mut closed = false;
    for _ in 0..5 {
        if host
            .drain()
            .iter()
            .any(|message| matches!(message, ServerMessage::QuestionHostResult { .. }))
        {
            closed = true;
            break;
        }
        send(&state, &host, end(&code, 0)).await;
    }
    assert!(closed);

    let mut accepted = BTreeSet::new();
    let mut results = Vec::new();
    for (i, player) in players.iter_mut().enumerate() {
        let messages = player.drain();
        let was_accepted = messages
            .iter()
            .any(|message| matches!(message, ServerMessage::AnswerAccepted { .. }));
        if was_accepted {
            accepted.insert(nicknames[i].clone());
        } else {
            assert!(messages.iter().any(|message| matches!(
                message,
                ServerMessage::Error {
                    code: ErrorCode::InvalidState | ErrorCode::Busy,
                    ..
                }
            )));
        }
        if results.is_empty() {
            results = player_results(&messages);
        }
    }

    let answered: BTreeSet<String> = results
        .iter()
        .filter(|result| result.answered)
        .map(|result| result.nickname.clone())
        .collect();
    assert_eq!(answered, accepted);
    assert!(state.repo().pending_connections(&code).await.unwrap().is_empty());
    assert_eq!(state.lock_manager().outstanding(), 0);
}

#[tokio::test]
async fn test_disconnected_player_keeps_score_and_loses_streak() {
    let (state, _) = setup();
    let (code, host, mut players) = lobby(&state, 2, &["ada", "bob"]).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;

    send(&state, &host, release(&code, 0)).await;
    let at = release_time(&state, &code).await;
    send(&state, &players[0], submit(&code, 0, "a", at + 2_000)).await;
    send(&state, &players[1], submit(&code, 0, "a", at + 1_000)).await;
    players[0].drain();
    send(&state, &host, end(&code, 0)).await;
    let first = player_results(&players[0].drain());
    let before = first.iter().find(|result| result.nickname == "bob").unwrap().clone();
    assert!(before.score > 0);
    assert_eq!(before.streak, 1);

    send(&state, &host, next(&code, 1)).await;
    send(&state, &host, release(&code, 1)).await;
    let at = release_time(&state, &code).await;
    send(&state, &players[0], submit(&code, 1, "a", at + 1_000)).await;
    roster_service::handle_disconnect(&state, &players[1].id).await.unwrap();
    state.hub().unregister(&players[1].id);
    players[0].drain();

    send(&state, &host, end(&code, 1)).await;

    let second = player_results(&players[0].drain());
    let absent = second.iter().find(|result| result.nickname == "bob").unwrap();
    assert!(!absent.answered);
    assert_eq!(absent.points, 0);
    assert_eq!(absent.streak, 0);
    assert_eq!(absent.score, before.score);
}

#[tokio::test]
async fn test_contended_submission_reports_busy() {
    let config = AppConfig::default().with_lock_policy(LockPolicy {
        lease: Duration::from_secs(5),
        attempts: 1,
        retry_delay: Duration::from_millis(1),
    });
    let (state, _) = setup_with(config);
    let (code, host, mut players) = lobby(&state, 1, &["ada"]).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;
    send(&state, &host, release(&code, 0)).await;
    let at = release_time(&state, &code).await;
    players[0].drain();

    let held = state
        .lock_manager()
        .acquire("connection:p0", Duration::from_secs(5))
        .await
        .unwrap();
    send(&state, &players[0], submit(&code, 0, "a", at + 1_000)).await;

    match players[0].drain().as_slice() {
        [ServerMessage::Error { code, .. }] => assert_eq!(*code, ErrorCode::Busy),
        other => panic!("unexpected messages {other:?}"),
    }
    assert!(state.repo().load_pending(&code, "p0").await.unwrap().is_none());

    state.lock_manager().release(held).await.unwrap();
    send(&state, &players[0], submit(&code, 0, "a", at + 1_000)).await;
    assert!(players[0]
        .drain()
        .iter()
        .any(|message| matches!(message, ServerMessage::AnswerAccepted { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_host_disconnect_outlasts_a_stuck_player_lease() {
    let (state, notifier) = setup();
    let (code, host, mut players) = lobby(&state, 1, &["ada", "bob"]).await;
    send(&state, &host, ClientMessage::HostStart(game_code(&code))).await;
    for player in &mut players {
        player.drain();
    }

    // Held for a full lease and never released, as if its owner crashed.
    let lease = state.config().lock_policy().lease;
    let _stuck = state
        .lock_manager()
        .acquire("connection:p1", lease)
        .await
        .unwrap();

    roster_service::handle_disconnect(&state, &host.id).await.unwrap();
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert!(state.repo().load_session(&code).await.unwrap().is_none());
    assert!(state.repo().load_roster(&code).await.unwrap().is_empty());
    assert!(state.repo().load_binding(&host.id).await.unwrap().is_none());
    for player in &mut players {
        assert!(state.repo().load_binding(&player.id).await.unwrap().is_none());
        assert!(player
            .drain()
            .iter()
            .any(|message| matches!(message, ServerMessage::HostDisconnected)));
    }
    assert_eq!(notifier.count(SessionStatus::Terminated), 1);
    assert_eq!(state.lock_manager().outstanding(), 0);

    let mut latecomer = Client::connect(&state, "late");
    send(
        &state,
        &latecomer,
        ClientMessage::PlayerJoin(PlayerJoinPayload {
            game_code: code.clone(),
            nickname: "cy".into(),
        }),
    )
    .await;
    match latecomer.drain().as_slice() {
        [ServerMessage::Error { code, .. }] => assert_eq!(*code, ErrorCode::GameNotFound),
        other => panic!("unexpected messages {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_player_disconnect_waits_out_a_busy_roster() {
    let (state, _) = setup();
    let (code, _host, players) = lobby(&state, 1, &["ada", "bob"]).await;

    let held = state
        .lock_manager()
        .acquire(&format!("roster:{code}"), Duration::from_millis(300))
        .await
        .unwrap();
    let manager = state.lock_manager();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = manager.release(held).await;
    });

    roster_service::handle_disconnect(&state, &players[1].id).await.unwrap();

    let roster = state.repo().load_roster(&code).await.unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].nickname, "ada");
    assert!(state.repo().load_binding(&players[1].id).await.unwrap().is_none());
    assert_eq!(state.lock_manager().outstanding(), 0);
}
