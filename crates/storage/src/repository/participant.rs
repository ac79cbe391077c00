use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::types::Json;

use crate::error::{Result, StorageError};
use crate::models::CachedParticipant;

/// Read-through cache of the participants of each competition.
pub struct ParticipantCacheRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ParticipantCacheRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Caches a batch of `(participant_id, document)` pairs in one transaction.
    pub async fn upsert_many(
        &self,
        competition_id: i64,
        participants: &[(i64, serde_json::Value)],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let cached_at = Utc::now();
        let mut count = 0u64;

        for (participant_id, document) in participants {
            sqlx::query(
                r#"
                INSERT INTO participants (participant_id, competition_id, document, cached_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (participant_id) DO UPDATE SET
                    competition_id = excluded.competition_id,
                    document = excluded.document,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(participant_id)
            .bind(competition_id)
            .bind(Json(document))
            .bind(cached_at)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::classify)?;
            count += 1;
        }

        tx.commit().await?;
        Ok(count)
    }

    pub async fn list_for_competition(&self, competition_id: i64) -> Result<Vec<CachedParticipant>> {
        let participants = sqlx::query_as::<_, CachedParticipant>(
            r#"
            SELECT participant_id, competition_id, document, cached_at
            FROM participants
            WHERE competition_id = ?
            ORDER BY participant_id
            "#,
        )
        .bind(competition_id)
        .fetch_all(self.pool)
        .await?;

        Ok(participants)
    }
}
