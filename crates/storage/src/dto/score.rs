use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{ParameterScore, ScoreData};
use crate::services::score_computation::validate_score_value;

/// Body of `POST /judging/score/{competition_id}/{participant_id}/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SubmitScoreRequest {
    #[validate(range(min = 1, message = "judge_id must be positive"))]
    pub judge_id: i64,

    #[validate(length(min = 1, message = "At least one parameter score is required"))]
    #[validate(nested)]
    pub scores: Vec<ScoreItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ScoreItem {
    pub parameter_id: i64,

    #[validate(custom(function = "validate_mark"))]
    pub value: Decimal,

    #[serde(default)]
    pub comments: String,
}

impl SubmitScoreRequest {
    pub fn new(judge_id: i64, score_data: &ScoreData) -> Self {
        let scores = ParameterScore::from_score_data(score_data)
            .into_iter()
            .map(|score| ScoreItem {
                parameter_id: score.parameter_id,
                value: score.value,
                comments: score.comments,
            })
            .collect();

        Self { judge_id, scores }
    }
}

fn validate_mark(value: &Decimal) -> Result<(), ValidationError> {
    validate_score_value(*value).map_err(|e| {
        let mut error = ValidationError::new("score_value");
        error.message = Some(e.to_string().into());
        error
    })
}
