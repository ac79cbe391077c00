use sqlx::SqlitePool;
use sqlx::types::Json;

use crate::error::{Result, StorageError};
use crate::models::{NewScoreSubmission, PendingScoreRow, ScoreSubmission};

/// Durable queue of score sheets that could not reach the server.
///
/// Records are only ever inserted or deleted, so SQLite's per-statement
/// atomicity is all the locking the queue needs. Callers must not rely on the
/// order rows come back in.
pub struct PendingScoreRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PendingScoreRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, submission: &NewScoreSubmission) -> Result<ScoreSubmission> {
        let row = sqlx::query_as::<_, PendingScoreRow>(
            r#"
            INSERT INTO pending_scores (competition_id, participant_id, judge_id, score_data, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, competition_id, participant_id, judge_id, score_data, created_at
            "#,
        )
        .bind(submission.competition_id)
        .bind(submission.participant_id)
        .bind(submission.judge_id)
        .bind(Json(&submission.score_data))
        .bind(submission.timestamp)
        .fetch_one(self.pool)
        .await
        .map_err(StorageError::classify)?;

        tracing::debug!(
            id = row.id,
            competition_id = row.competition_id,
            participant_id = row.participant_id,
            "Queued score sheet for later delivery"
        );

        Ok(row.into())
    }

    pub async fn list_pending(&self) -> Result<Vec<ScoreSubmission>> {
        let rows = sqlx::query_as::<_, PendingScoreRow>(
            r#"
            SELECT id, competition_id, participant_id, judge_id, score_data, created_at
            FROM pending_scores
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(ScoreSubmission::from).collect())
    }

    pub async fn list_for_competition(&self, competition_id: i64) -> Result<Vec<ScoreSubmission>> {
        let rows = sqlx::query_as::<_, PendingScoreRow>(
            r#"
            SELECT id, competition_id, participant_id, judge_id, score_data, created_at
            FROM pending_scores
            WHERE competition_id = ?
            "#,
        )
        .bind(competition_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(ScoreSubmission::from).collect())
    }

    pub async fn list_for_participant(
        &self,
        competition_id: i64,
        participant_id: i64,
    ) -> Result<Vec<ScoreSubmission>> {
        let rows = sqlx::query_as::<_, PendingScoreRow>(
            r#"
            SELECT id, competition_id, participant_id, judge_id, score_data, created_at
            FROM pending_scores
            WHERE competition_id = ? AND participant_id = ?
            "#,
        )
        .bind(competition_id)
        .bind(participant_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(ScoreSubmission::from).collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pending_scores")
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    /// Deletes a delivered submission. Unknown ids are ignored, since a retry
    /// can race with another removal of the same row.
    pub async fn remove(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM pending_scores WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(id, "Pending score already removed");
        }

        Ok(())
    }
}
