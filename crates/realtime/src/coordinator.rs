use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use storage::Database;
use storage::dto::SubmitScoreRequest;
use storage::models::{NewScoreSubmission, ScoreData, ScoreSubmission};
use storage::repository::PendingScoreRepository;
use storage::services::score_computation::validate_score_data;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, SyncError};
use crate::sync::DualChannelSync;
use crate::topic::ScoreUpdate;
use crate::traits::ScoreApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    /// Queued locally, waiting for the network.
    Offline,
    /// A sync ran but some queued sheets are still undelivered.
    Pending,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveOutcome {
    pub success: bool,
    pub status: SaveStatus,
    /// Local queue id when the sheet was stored offline.
    pub submission_id: Option<i64>,
    pub error: Option<String>,
}

impl SaveOutcome {
    fn saved() -> Self {
        Self {
            success: true,
            status: SaveStatus::Saved,
            submission_id: None,
            error: None,
        }
    }

    fn queued(submission_id: i64) -> Self {
        Self {
            success: true,
            status: SaveStatus::Offline,
            submission_id: Some(submission_id),
            error: None,
        }
    }

    fn failed(error: &SyncError) -> Self {
        Self {
            success: false,
            status: SaveStatus::Error,
            submission_id: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    /// Queue ids that stayed queued.
    pub failed: Vec<i64>,
}

/// Routes each save to the live write path or the offline queue, and drains
/// the queue when connectivity returns.
pub struct SaveCoordinator {
    sync: Arc<DualChannelSync>,
    database: Arc<Database>,
    status: watch::Sender<SaveStatus>,
    syncing: AtomicBool,
}

impl SaveCoordinator {
    pub fn new(sync: Arc<DualChannelSync>, database: Arc<Database>) -> Self {
        let (status, _) = watch::channel(SaveStatus::Idle);
        Self {
            sync,
            database,
            status,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> SaveStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SaveStatus> {
        self.status.subscribe()
    }

    pub async fn pending_count(&self) -> Result<i64> {
        let pool = self.database.pool().await?;
        Ok(PendingScoreRepository::new(pool).count().await?)
    }

    /// Saves one judge's sheet.
    ///
    /// Invalid marks are rejected with `Err` before any IO. Every other
    /// failure comes back as an `Ok` outcome with [`SaveStatus::Error`].
    /// An online failure is never diverted to the offline queue.
    pub async fn save_score(
        &self,
        competition_id: i64,
        participant_id: i64,
        judge_id: i64,
        score_data: ScoreData,
    ) -> Result<SaveOutcome> {
        validate_score_data(&score_data)?;
        self.status.send_replace(SaveStatus::Saving);

        let outcome = if self.sync.monitor().is_online() {
            let update = ScoreUpdate::new(competition_id, participant_id, judge_id, score_data);
            match self.sync.send_update(&update).await {
                Ok(()) => {
                    tracing::info!(competition_id, participant_id, judge_id, "Score saved");
                    SaveOutcome::saved()
                }
                Err(e) => {
                    tracing::error!(competition_id, participant_id, judge_id, error = %e, "Failed to save score");
                    SaveOutcome::failed(&e)
                }
            }
        } else {
            let submission =
                NewScoreSubmission::new(competition_id, participant_id, judge_id, score_data);
            match self.enqueue(&submission).await {
                Ok(queued) => {
                    tracing::info!(
                        competition_id,
                        participant_id,
                        judge_id,
                        submission_id = queued.id,
                        "Offline, score queued for later sync"
                    );
                    SaveOutcome::queued(queued.id)
                }
                Err(e) => {
                    tracing::error!(competition_id, participant_id, judge_id, error = %e, "Failed to queue score offline");
                    SaveOutcome::failed(&e)
                }
            }
        };

        self.status.send_replace(outcome.status);
        Ok(outcome)
    }

    async fn enqueue(&self, submission: &NewScoreSubmission) -> Result<ScoreSubmission> {
        let pool = self.database.pool().await?;
        Ok(PendingScoreRepository::new(pool).enqueue(submission).await?)
    }

    /// Replays the offline queue through REST, oldest first, one at a time.
    /// Delivered sheets are removed; failed ones stay for the next run.
    pub async fn sync_pending_actions(&self) -> Result<SyncReport> {
        if !self.sync.monitor().is_online() {
            return Err(SyncError::Offline);
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::SyncInProgress);
        }
        let _running = SyncFlag(&self.syncing);

        let report = self.replay_queue().await?;

        if !report.failed.is_empty() {
            self.status.send_replace(SaveStatus::Pending);
        } else if report.synced > 0 {
            self.status.send_replace(SaveStatus::Saved);
        }

        Ok(report)
    }

    async fn replay_queue(&self) -> Result<SyncReport> {
        let pool = self.database.pool().await?;
        let queue = PendingScoreRepository::new(pool);

        let mut pending = queue.list_pending().await?;
        pending.sort_by_key(|submission| (submission.timestamp, submission.id));

        let mut report = SyncReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::info!(count = pending.len(), "Syncing queued scores");

        for submission in pending {
            report.attempted += 1;
            let request = SubmitScoreRequest::new(submission.judge_id, &submission.score_data);

            let delivered = self
                .sync
                .api()
                .submit_score(submission.competition_id, submission.participant_id, &request)
                .await;

            if let Err(e) = delivered {
                tracing::warn!(submission_id = submission.id, error = %e, "Queued score not delivered, keeping it");
                report.failed.push(submission.id);
                continue;
            }

            match queue.remove(submission.id).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    // Delivered but still queued; the next run resends it.
                    tracing::error!(submission_id = submission.id, error = %e, "Failed to dequeue delivered score");
                    report.failed.push(submission.id);
                }
            }
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed.len(),
            "Queued score sync finished"
        );
        Ok(report)
    }

    /// Drains the queue every time the monitor goes from offline to online,
    /// and once at start if already online.
    pub fn spawn_auto_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut state = self.sync.monitor().subscribe();

        tokio::spawn(async move {
            let mut was_online = state.borrow_and_update().is_online;
            if was_online {
                coordinator.auto_sync().await;
            }

            while state.changed().await.is_ok() {
                let online = state.borrow_and_update().is_online;
                if online && !was_online {
                    coordinator.auto_sync().await;
                }
                was_online = online;
            }
        })
    }

    async fn auto_sync(&self) {
        match self.pending_count().await {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to read offline queue");
                return;
            }
        }

        match self.sync_pending_actions().await {
            Ok(report) => tracing::debug!(synced = report.synced, "Auto-sync finished"),
            Err(SyncError::SyncInProgress) => tracing::debug!("Auto-sync skipped, sync already running"),
            Err(e) => tracing::warn!(error = %e, "Auto-sync failed"),
        }
    }
}

/// Clears the in-progress flag however the sync ends.
struct SyncFlag<'a>(&'a AtomicBool);

impl Drop for SyncFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
