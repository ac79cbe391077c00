pub mod api;
pub mod catalog;
pub mod channels;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod retry;
pub mod sync;
pub mod topic;
pub mod traits;

#[cfg(test)]
mod testing;

pub use api::RestClient;
pub use catalog::Catalog;
pub use channels::{SocketChannel, SocketMessage, StoreChannel};
pub use client::JudgingClient;
pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivityState, HttpProbe, SyncMethod};
pub use coordinator::{SaveCoordinator, SaveOutcome, SaveStatus, SyncReport};
pub use error::{Result, SyncError};
pub use retry::RetryPolicy;
pub use sync::{DualChannelSync, Subscription};
pub use topic::{ChannelKind, RealtimeUpdate, ScoreUpdate, Topic, UpdateHandler, UpdateKind};
pub use traits::{ChannelSubscription, ConnectivityProbe, RealtimeChannel, ScoreApi};
