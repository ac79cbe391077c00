use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Rider {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nationality: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Horse {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub breed: String,
}

/// Row animation hint for the ranking board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowDirection {
    Up,
    Down,
    New,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionChange {
    Better,
    Worse,
    #[default]
    Same,
}

/// One line of a competition ranking.
///
/// `direction` and `change` are never persisted; they are recomputed on each
/// update by the view's [`PositionTracker`](crate::services::PositionTracker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub participant_id: i64,
    pub rider: Rider,
    pub horse: Horse,
    pub average: Decimal,
    pub percentage: Decimal,
    pub position: u32,
    #[serde(default)]
    pub direction: RowDirection,
    #[serde(default)]
    pub change: PositionChange,
}
