pub mod ranking_positions;
pub mod score_computation;

pub use ranking_positions::PositionTracker;
pub use score_computation::{
    FinalRanking, RankedParticipant, RankingResult, ScoringParameter, assign_positions,
    compute_average, compute_final_ranking, compute_parameter_result, compute_ranking,
};
