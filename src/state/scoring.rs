//! Pure scoring and ranking for one closed question.
//!
//! Correct answers draw from a per-question bonus pool in submission order. The pool is sized for
//! the final number of correct answerers, so the computation only runs once every submission is in.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state::session::{Millis, PendingAnswer, Player, Question, QuestionKind};

/// Tunables of the scoring formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringRules {
    /// Size of the bonus pool for each question.
    pub score_bank_max: u32,
    /// Points for a correct answer before streak multiplier and pool bonus.
    pub base_reward: u32,
    /// Streak length worth one extra base reward.
    pub strike_divisor: u32,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            score_bank_max: 100,
            base_reward: 10,
            strike_divisor: 5,
        }
    }
}

/// Per-player result of a closed question.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerOutcome {
    /// Socket of the player.
    pub connection_id: String,
    /// Dense player id.
    pub player_id: u32,
    /// Display name.
    pub nickname: String,
    /// Submitted answer; empty when the player did not answer.
    pub answer: Vec<String>,
    /// Whether a submission for this question was found.
    pub answered: bool,
    /// Whether the submission matched.
    pub is_correct: bool,
    /// Points earned on this question.
    pub points_awarded: u64,
    /// Total score after this question.
    pub score: u64,
    /// Streak after this question.
    pub strike_count: u32,
    /// Rank after this question.
    pub rank: u32,
    /// Corrected submission time.
    pub submitted_at: Option<Millis>,
    /// Seconds between release and submission.
    pub elapsed_seconds: Option<f64>,
}

/// Aggregate numbers shown to the host after a question closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionStatistic {
    /// Players on the roster.
    pub total_players: usize,
    /// Players who submitted.
    pub answered: usize,
    /// Players who answered correctly.
    pub correct: usize,
    /// Submission count per choice id (or per submitted text), in choice order first.
    pub distribution: IndexMap<String, usize>,
}

/// Updated roster plus the outcomes, ordered by rank.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSheet {
    /// Roster in its original (join) order with score, streak and rank applied.
    pub players: Vec<Player>,
    /// Outcomes ordered by rank.
    pub outcomes: Vec<PlayerOutcome>,
    /// Host-facing aggregate.
    pub statistic: QuestionStatistic,
}

/// Decide whether `answer` matches the accepted answers of `question`.
pub fn is_correct(question: &Question, answer: &[String]) -> bool {
    if answer.is_empty() {
        return false;
    }

    match question.kind {
        QuestionKind::Single | QuestionKind::Multiple => {
            let mut submitted: Vec<&str> = answer.iter().map(String::as_str).collect();
            submitted.sort_unstable();
            submitted.dedup();
            if submitted.len() != answer.len() {
                return false;
            }

            let mut expected: Vec<&str> = question.correct_answers.iter().map(String::as_str).collect();
            expected.sort_unstable();
            expected.dedup();
            submitted == expected
        }
        QuestionKind::Text => {
            let [text] = answer else {
                return false;
            };
            let text = text.to_lowercase();
            !text.is_empty()
                && question
                    .correct_answers
                    .iter()
                    .any(|accepted| accepted.to_lowercase() == text)
        }
    }
}

/// Score `question` for every player in the roster.
///
/// `submissions` is keyed by connection id; entries for another question index are ignored.
pub fn score(
    players: &[Player],
    submissions: &HashMap<String, PendingAnswer>,
    question_index: usize,
    question: &Question,
    rules: &ScoringRules,
) -> ScoreSheet {
    let answers: Vec<Option<&PendingAnswer>> = players
        .iter()
        .map(|player| {
            submissions
                .get(&player.connection_id)
                .filter(|pending| pending.question_index == question_index)
        })
        .collect();

    let correct: Vec<bool> = answers
        .iter()
        .map(|answer| answer.is_some_and(|pending| is_correct(question, &pending.raw_answer)))
        .collect();

    // Submission order over correct answerers; stable on roster order for identical timestamps.
    let mut pool_order: Vec<usize> = (0..players.len()).filter(|&i| correct[i]).collect();
    pool_order.sort_by_key(|&i| answers[i].map(|pending| pending.submitted_at));

    let mut points = vec![0u64; players.len()];
    let correct_count = pool_order.len();
    if correct_count > 0 {
        let bank = f64::from(rules.score_bank_max);
        let share = bank / correct_count as f64;
        let divisor = f64::from(rules.strike_divisor.max(1));
        let mut pool = bank;

        for &i in &pool_order {
            let prior_streak = f64::from(players[i].strike_count);
            let multiplier = (prior_streak / divisor + 1.0).max(1.0);
            let awarded = f64::from(rules.base_reward) * multiplier + pool;
            points[i] = awarded.round() as u64;
            pool = (pool - share).max(0.0);
        }
    }

    let mut updated: Vec<Player> = players
        .iter()
        .enumerate()
        .map(|(i, player)| {
            let mut player = player.clone();
            player.score += points[i];
            if correct[i] {
                player.strike_count += 1;
                player.number_of_correct_answers += 1;
            } else {
                player.strike_count = 0;
            }
            player.pending_answer = None;
            player
        })
        .collect();

    let mut by_rank: Vec<usize> = (0..updated.len()).collect();
    by_rank.sort_by(|&a, &b| updated[b].score.cmp(&updated[a].score));
    for (position, &i) in by_rank.iter().enumerate() {
        updated[i].rank = position as u32 + 1;
    }

    let outcomes = by_rank
        .iter()
        .map(|&i| {
            let player = &updated[i];
            let answer = answers[i];
            PlayerOutcome {
                connection_id: player.connection_id.clone(),
                player_id: player.player_id,
                nickname: player.nickname.clone(),
                answer: answer.map(|p| p.raw_answer.clone()).unwrap_or_default(),
                answered: answer.is_some(),
                is_correct: correct[i],
                points_awarded: points[i],
                score: player.score,
                strike_count: player.strike_count,
                rank: player.rank,
                submitted_at: answer.map(|p| p.submitted_at),
                elapsed_seconds: answer.map(|p| p.elapsed_seconds),
            }
        })
        .collect();

    let statistic = statistic(question, &answers, correct_count);

    ScoreSheet {
        players: updated,
        outcomes,
        statistic,
    }
}

fn statistic(
    question: &Question,
    answers: &[Option<&PendingAnswer>],
    correct: usize,
) -> QuestionStatistic {
    let mut distribution: IndexMap<String, usize> = question
        .choices
        .iter()
        .map(|choice| (choice.id.clone(), 0))
        .collect();

    for pending in answers.iter().flatten() {
        for value in &pending.raw_answer {
            let key = match question.kind {
                QuestionKind::Text => value.to_lowercase(),
                _ => value.clone(),
            };
            *distribution.entry(key).or_insert(0) += 1;
        }
    }

    QuestionStatistic {
        total_players: answers.len(),
        answered: answers.iter().filter(|answer| answer.is_some()).count(),
        correct,
        distribution,
    }
}
