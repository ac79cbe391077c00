pub mod dto;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

use std::str::FromStr;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;

use crate::error::Result;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Handle on the local offline store.
///
/// Schema upgrades are applied lazily: the first call to [`Database::pool`]
/// (or an explicit [`Database::run_migrations`]) runs any pending migrations,
/// later calls reuse the result.
pub struct Database {
    pool: SqlitePool,
    migrated: OnceCell<()>,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            migrated: OnceCell::new(),
        })
    }

    /// A private in-memory store. Backed by a single pinned connection since
    /// every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            migrated: OnceCell::new(),
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        self.migrated
            .get_or_try_init(|| async {
                tracing::info!("Applying offline store migrations");
                MIGRATOR.run(&self.pool).await?;
                Ok::<(), error::StorageError>(())
            })
            .await?;

        Ok(())
    }

    /// The connection pool, migrated.
    pub async fn pool(&self) -> Result<&SqlitePool> {
        self.run_migrations().await?;
        Ok(&self.pool)
    }

    pub fn is_migrated(&self) -> bool {
        self.migrated.initialized()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_run_lazily_once() {
        let db = Database::in_memory().await.unwrap();
        assert!(!db.is_migrated());

        db.pool().await.unwrap();
        assert!(db.is_migrated());

        db.run_migrations().await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(db.pool().await.unwrap())
            .await
            .unwrap();
        assert_eq!(applied, 2);
    }

    #[tokio::test]
    async fn test_index_migration_is_additive() {
        let db = Database::in_memory().await.unwrap();
        let pool = db.pool().await.unwrap();

        let indexes: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .unwrap();

        assert_eq!(
            indexes,
            vec![
                "idx_participants_competition",
                "idx_pending_scores_competition",
                "idx_pending_scores_participant",
            ]
        );
    }
}
