use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Last-seen copy of a competition, kept for offline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CachedCompetition {
    pub competition_id: i64,
    pub name: String,
    /// The competition exactly as the API returned it.
    pub document: Json<serde_json::Value>,
    pub cached_at: DateTime<Utc>,
}
