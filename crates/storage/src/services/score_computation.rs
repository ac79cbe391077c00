//! FEI "3-cell" scoring.
//!
//! Each parameter result is `round(min(score × coefficient, 10))`. A judge's
//! average is the mean of those results, and the final ranking of a
//! participant averages the per-judge *percentages*, not the raw averages.

use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::ScoreData;

const MAX_SCORE: Decimal = Decimal::TEN;
const DISPLAY_DP: u32 = 2;

/// Coefficient configuration for one competition parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringParameter {
    #[serde(default = "default_coefficient")]
    pub coefficient: Decimal,
}

impl ScoringParameter {
    pub fn new(coefficient: Decimal) -> Self {
        Self { coefficient }
    }
}

fn default_coefficient() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingResult {
    pub average: Decimal,
    pub percentage: Decimal,
    /// Per-parameter results, ordered by parameter id.
    pub results: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FinalRanking {
    pub average: Decimal,
    pub percentage: Decimal,
}

impl FinalRanking {
    pub const ZERO: FinalRanking = FinalRanking {
        average: Decimal::ZERO,
        percentage: Decimal::ZERO,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedParticipant {
    pub participant_id: i64,
    pub position: u32,
    pub average: Decimal,
    pub percentage: Decimal,
}

/// Checks a mark entered on the judging form: 0 to 10 in steps of 0.5.
pub fn validate_score_value(value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO || value > MAX_SCORE {
        return Err(ValidationError::ScoreOutOfRange(value));
    }
    if !(value * Decimal::TWO).fract().is_zero() {
        return Err(ValidationError::InvalidStep(value));
    }
    Ok(())
}

/// Checks every mark of a score sheet.
pub fn validate_score_data(score_data: &ScoreData) -> Result<(), ValidationError> {
    if score_data.is_empty() {
        return Err(ValidationError::EmptyScoreSheet);
    }
    score_data
        .values()
        .try_for_each(|score| validate_score_value(score.value))
}

/// Caps the weighted score at 10 and only then rounds half-up to an integer.
pub fn compute_parameter_result(
    judge_score: Decimal,
    coefficient: Decimal,
) -> Result<u8, ValidationError> {
    if judge_score < Decimal::ZERO || judge_score > MAX_SCORE {
        return Err(ValidationError::ScoreOutOfRange(judge_score));
    }
    if coefficient < Decimal::ZERO {
        return Err(ValidationError::NegativeCoefficient(coefficient));
    }

    let capped = (judge_score * coefficient).min(MAX_SCORE);
    let rounded = capped.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);

    Ok(rounded.to_u8().unwrap_or_default())
}

/// Arithmetic mean; zero for an empty slice.
pub fn compute_average(results: &[Decimal]) -> Decimal {
    if results.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = results.iter().copied().sum();
    sum / Decimal::from(results.len())
}

/// Ranking of a single judge's score sheet.
///
/// Only parameters present in both maps are scored. A parameter missing from
/// `parameters` has not been judged yet and is skipped rather than counted as
/// zero.
pub fn compute_ranking(
    parameter_scores: &BTreeMap<i64, Decimal>,
    parameters: &BTreeMap<i64, ScoringParameter>,
) -> Result<RankingResult, ValidationError> {
    let results = parameter_scores
        .iter()
        .filter_map(|(parameter_id, score)| {
            parameters
                .get(parameter_id)
                .map(|parameter| compute_parameter_result(*score, parameter.coefficient))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    let as_decimals: Vec<Decimal> = results.iter().map(|r| Decimal::from(*r)).collect();
    let average = compute_average(&as_decimals);

    Ok(RankingResult {
        average: round_display(average),
        percentage: round_display(to_percentage(average)),
        results,
    })
}

/// Combines every judge's sheet into the participant's final ranking.
pub fn compute_final_ranking(
    per_judge_scores: &[BTreeMap<i64, Decimal>],
    parameters: &BTreeMap<i64, ScoringParameter>,
) -> Result<FinalRanking, ValidationError> {
    if per_judge_scores.is_empty() {
        return Ok(FinalRanking::ZERO);
    }

    let percentages = per_judge_scores
        .iter()
        .map(|scores| compute_ranking(scores, parameters).map(|r| r.percentage))
        .collect::<Result<Vec<Decimal>, _>>()?;

    let percentage = compute_average(&percentages);
    let average = percentage / Decimal::ONE_HUNDRED * MAX_SCORE;

    Ok(FinalRanking {
        average: round_display(average),
        percentage: round_display(percentage),
    })
}

/// Orders participants by percentage (highest first) and numbers them from 1.
/// Ties keep their input order.
pub fn assign_positions(rankings: Vec<(i64, FinalRanking)>) -> Vec<RankedParticipant> {
    let mut rankings = rankings;
    rankings.sort_by(|a, b| b.1.percentage.cmp(&a.1.percentage));

    rankings
        .into_iter()
        .enumerate()
        .map(|(idx, (participant_id, ranking))| RankedParticipant {
            participant_id,
            position: idx as u32 + 1,
            average: ranking.average,
            percentage: ranking.percentage,
        })
        .collect()
}

/// Raw marks of a score sheet, as consumed by [`compute_ranking`].
pub fn raw_scores(score_data: &ScoreData) -> BTreeMap<i64, Decimal> {
    score_data
        .iter()
        .map(|(parameter_id, score)| (*parameter_id, score.value))
        .collect()
}

fn to_percentage(average: Decimal) -> Decimal {
    average / MAX_SCORE * Decimal::ONE_HUNDRED
}

fn round_display(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DISPLAY_DP, RoundingStrategy::MidpointAwayFromZero)
}
