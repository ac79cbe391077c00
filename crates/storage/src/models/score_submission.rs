use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// A single judge mark for one parameter of the 3-cell form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreValue {
    pub value: Decimal,
    #[serde(default)]
    pub comments: String,
}

impl ScoreValue {
    pub fn new(value: Decimal, comments: impl Into<String>) -> Self {
        Self {
            value,
            comments: comments.into(),
        }
    }
}

/// A judge's marks for one participant, keyed by parameter id.
pub type ScoreData = BTreeMap<i64, ScoreValue>;

/// Flattened form of a [`ScoreValue`] carrying its parameter id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterScore {
    pub parameter_id: i64,
    pub value: Decimal,
    #[serde(default)]
    pub comments: String,
}

impl ParameterScore {
    pub fn from_score_data(score_data: &ScoreData) -> Vec<Self> {
        score_data
            .iter()
            .map(|(parameter_id, score)| Self {
                parameter_id: *parameter_id,
                value: score.value,
                comments: score.comments.clone(),
            })
            .collect()
    }
}

/// Fields of a submission before the local store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScoreSubmission {
    pub competition_id: i64,
    pub participant_id: i64,
    pub judge_id: i64,
    pub score_data: ScoreData,
    pub timestamp: DateTime<Utc>,
}

impl NewScoreSubmission {
    pub fn new(competition_id: i64, participant_id: i64, judge_id: i64, score_data: ScoreData) -> Self {
        Self {
            competition_id,
            participant_id,
            judge_id,
            score_data,
            timestamp: Utc::now(),
        }
    }
}

/// A score sheet waiting in the offline queue. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSubmission {
    pub id: i64,
    pub competition_id: i64,
    pub participant_id: i64,
    pub judge_id: i64,
    pub score_data: ScoreData,
    pub timestamp: DateTime<Utc>,
}

#[derive(FromRow)]
pub(crate) struct PendingScoreRow {
    pub id: i64,
    pub competition_id: i64,
    pub participant_id: i64,
    pub judge_id: i64,
    pub score_data: Json<ScoreData>,
    pub created_at: DateTime<Utc>,
}

impl From<PendingScoreRow> for ScoreSubmission {
    fn from(row: PendingScoreRow) -> Self {
        Self {
            id: row.id,
            competition_id: row.competition_id,
            participant_id: row.participant_id,
            judge_id: row.judge_id,
            score_data: row.score_data.0,
            timestamp: row.created_at,
        }
    }
}
