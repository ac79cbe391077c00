pub mod ranking;
pub mod score;

pub use ranking::{RankingRecord, parse_rankings};
pub use score::{ScoreItem, SubmitScoreRequest};
