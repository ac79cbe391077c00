use serde_json::Value;
use storage::dto::SubmitScoreRequest;
use storage::models::RankingEntry;
use tokio::sync::watch;

use crate::Result;
use crate::topic::{ChannelKind, ScoreUpdate, Topic, UpdateHandler};

/// The authoritative REST backend.
#[async_trait::async_trait]
pub trait ScoreApi: Send + Sync {
    /// Upserts a judge's sheet. The server treats `(participant, judge,
    /// parameter)` as the key, so replaying a submission is harmless.
    async fn submit_score(
        &self,
        competition_id: i64,
        participant_id: i64,
        request: &SubmitScoreRequest,
    ) -> Result<()>;

    async fn fetch_rankings(&self, competition_id: i64) -> Result<Vec<RankingEntry>>;

    async fn fetch_competition(&self, competition_id: i64) -> Result<Value>;

    async fn fetch_participants(&self, competition_id: i64) -> Result<Vec<Value>>;
}

/// One live-update transport.
#[async_trait::async_trait]
pub trait RealtimeChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Starts listening on `topic`. Connection failures after this returns are
    /// handled by the channel's own reconnection policy.
    async fn subscribe(
        &self,
        topic: Topic,
        handler: UpdateHandler,
    ) -> Result<Box<dyn ChannelSubscription>>;

    /// Mirrors an already-accepted score sheet to the other clients.
    async fn publish_score(&self, update: &ScoreUpdate) -> Result<()>;

    /// `true` while at least one connection of this channel is open.
    fn connection_status(&self) -> watch::Receiver<bool>;

    fn is_connected(&self) -> bool {
        *self.connection_status().borrow()
    }
}

/// A live listener. Dropping it stops the listener without a graceful close.
#[async_trait::async_trait]
pub trait ChannelSubscription: Send {
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Platform reachability signals.
#[async_trait::async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// What the platform currently reports (link layer only).
    fn current_state(&self) -> bool;

    /// Platform online/offline events.
    fn on_change(&self) -> watch::Receiver<bool>;

    /// Whether the internet is actually reachable.
    async fn check_liveness(&self) -> bool;
}
