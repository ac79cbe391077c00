use std::sync::Arc;

use serde_json::Value;
use storage::Database;
use storage::error::StorageError;
use storage::repository::{CompetitionCacheRepository, ParticipantCacheRepository};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError};
use crate::traits::ScoreApi;

/// Competition and participant lookups that keep working offline.
///
/// Online reads go to the API and are written through to the local cache;
/// offline reads, or reads whose request fails in transit, are answered from
/// the cache.
pub struct Catalog {
    api: Arc<dyn ScoreApi>,
    database: Arc<Database>,
    monitor: ConnectivityMonitor,
}

impl Catalog {
    pub fn new(api: Arc<dyn ScoreApi>, database: Arc<Database>, monitor: ConnectivityMonitor) -> Self {
        Self {
            api,
            database,
            monitor,
        }
    }

    pub async fn competition(&self, competition_id: i64) -> Result<Value> {
        if !self.monitor.is_online() {
            return self.cached_competition(competition_id, SyncError::Offline).await;
        }

        match self.api.fetch_competition(competition_id).await {
            Ok(document) => {
                if let Err(e) = self.cache_competition(competition_id, &document).await {
                    tracing::warn!(competition_id, error = %e, "Failed to cache competition");
                }
                Ok(document)
            }
            Err(e) if unreachable(&e) => self.cached_competition(competition_id, e).await,
            Err(e) => Err(e),
        }
    }

    pub async fn participants(&self, competition_id: i64) -> Result<Vec<Value>> {
        if !self.monitor.is_online() {
            return self.cached_participants(competition_id, SyncError::Offline).await;
        }

        match self.api.fetch_participants(competition_id).await {
            Ok(participants) => {
                match self.cache_participants(competition_id, &participants).await {
                    Ok(cached) => tracing::debug!(competition_id, cached, "Participants cached"),
                    Err(e) => {
                        tracing::warn!(competition_id, error = %e, "Failed to cache participants")
                    }
                }
                Ok(participants)
            }
            Err(e) if unreachable(&e) => self.cached_participants(competition_id, e).await,
            Err(e) => Err(e),
        }
    }

    async fn cache_competition(&self, competition_id: i64, document: &Value) -> Result<()> {
        let name = document
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let pool = self.database.pool().await?;
        CompetitionCacheRepository::new(pool)
            .upsert(competition_id, name, document)
            .await?;
        Ok(())
    }

    async fn cache_participants(&self, competition_id: i64, participants: &[Value]) -> Result<u64> {
        let keyed: Vec<(i64, Value)> = participants
            .iter()
            .filter_map(|participant| participant_id(participant).map(|id| (id, participant.clone())))
            .collect();

        let pool = self.database.pool().await?;
        let cached = ParticipantCacheRepository::new(pool)
            .upsert_many(competition_id, &keyed)
            .await?;
        Ok(cached)
    }

    async fn cached_competition(&self, competition_id: i64, cause: SyncError) -> Result<Value> {
        let pool = self.database.pool().await?;
        match CompetitionCacheRepository::new(pool).find_by_id(competition_id).await {
            Ok(cached) => {
                tracing::info!(competition_id, cached_at = %cached.cached_at, "Serving cached competition");
                Ok(cached.document.0)
            }
            Err(StorageError::NotFound) => Err(cause),
            Err(e) => Err(e.into()),
        }
    }

    async fn cached_participants(&self, competition_id: i64, cause: SyncError) -> Result<Vec<Value>> {
        let pool = self.database.pool().await?;
        let cached = ParticipantCacheRepository::new(pool)
            .list_for_competition(competition_id)
            .await?;

        if cached.is_empty() {
            return Err(cause);
        }

        tracing::info!(competition_id, count = cached.len(), "Serving cached participants");
        Ok(cached.into_iter().map(|participant| participant.document.0).collect())
    }
}

/// The request never reached a working server.
fn unreachable(error: &SyncError) -> bool {
    match error {
        SyncError::Http { status, .. } => *status >= 500,
        other => other.is_network(),
    }
}

fn participant_id(participant: &Value) -> Option<i64> {
    participant
        .get("id")
        .or_else(|| participant.get("participant_id"))
        .and_then(Value::as_i64)
}
