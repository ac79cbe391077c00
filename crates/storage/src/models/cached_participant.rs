use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Last-seen copy of a participant, kept for offline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CachedParticipant {
    pub participant_id: i64,
    pub competition_id: i64,
    pub document: Json<serde_json::Value>,
    pub cached_at: DateTime<Utc>,
}
