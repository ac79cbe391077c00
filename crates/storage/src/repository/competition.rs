use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::types::Json;

use crate::error::{Result, StorageError};
use crate::models::CachedCompetition;

/// Read-through cache of competitions last fetched from the API.
pub struct CompetitionCacheRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CompetitionCacheRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Stores or replaces the cached copy of a competition.
    pub async fn upsert(
        &self,
        competition_id: i64,
        name: &str,
        document: &serde_json::Value,
    ) -> Result<CachedCompetition> {
        let competition = sqlx::query_as::<_, CachedCompetition>(
            r#"
            INSERT INTO competitions (competition_id, name, document, cached_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (competition_id) DO UPDATE SET
                name = excluded.name,
                document = excluded.document,
                cached_at = excluded.cached_at
            RETURNING competition_id, name, document, cached_at
            "#,
        )
        .bind(competition_id)
        .bind(name)
        .bind(Json(document))
        .bind(Utc::now())
        .fetch_one(self.pool)
        .await
        .map_err(StorageError::classify)?;

        Ok(competition)
    }

    pub async fn find_by_id(&self, competition_id: i64) -> Result<CachedCompetition> {
        let competition = sqlx::query_as::<_, CachedCompetition>(
            r#"
            SELECT competition_id, name, document, cached_at
            FROM competitions
            WHERE competition_id = ?
            "#,
        )
        .bind(competition_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(StorageError::NotFound)?;

        Ok(competition)
    }

    pub async fn list(&self) -> Result<Vec<CachedCompetition>> {
        let competitions = sqlx::query_as::<_, CachedCompetition>(
            r#"
            SELECT competition_id, name, document, cached_at
            FROM competitions
            ORDER BY name
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(competitions)
    }
}
