mod cached_competition;
mod cached_participant;
mod ranking_entry;
mod score_submission;

pub use cached_competition::CachedCompetition;
pub use cached_participant::CachedParticipant;
pub use ranking_entry::{Horse, PositionChange, RankingEntry, Rider, RowDirection};
pub use score_submission::{
    NewScoreSubmission, ParameterScore, ScoreData, ScoreSubmission, ScoreValue,
};

pub(crate) use score_submission::PendingScoreRow;
