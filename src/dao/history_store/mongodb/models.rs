use mongodb::bson::{Binary, DateTime, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::HistoryRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoHistoryDocument {
    session_id: Binary,
    player_id: u32,
    question_id: String,
    answer: Vec<String>,
    is_correct: bool,
    points_awarded: i64,
    score: i64,
    strike_count: u32,
    submitted_at: Option<DateTime>,
    nickname: String,
    rank: u32,
    recorded_at: DateTime,
}

impl From<HistoryRecord> for MongoHistoryDocument {
    fn from(value: HistoryRecord) -> Self {
        Self {
            session_id: uuid_as_binary(value.session_id),
            player_id: value.player_id,
            question_id: value.question_id,
            answer: value.answer,
            is_correct: value.is_correct,
            points_awarded: i64::try_from(value.points_awarded).unwrap_or(i64::MAX),
            score: i64::try_from(value.score).unwrap_or(i64::MAX),
            strike_count: value.strike_count,
            submitted_at: value.submitted_at.map(DateTime::from_millis),
            nickname: value.nickname,
            rank: value.rank,
            recorded_at: DateTime::now(),
        }
    }
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}
