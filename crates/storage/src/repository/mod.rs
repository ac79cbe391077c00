pub mod competition;
pub mod participant;
pub mod pending_score;

pub use competition::CompetitionCacheRepository;
pub use participant::ParticipantCacheRepository;
pub use pending_score::PendingScoreRepository;
