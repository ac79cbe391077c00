use storage::error::{StorageError, ValidationError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] validator::ValidationErrors),

    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Server responded with {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("A pending score sync is already running")]
    SyncInProgress,

    #[error("Network is offline")]
    Offline,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Folds client-side timeouts into [`SyncError::Timeout`].
    pub fn from_request(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            SyncError::Timeout
        } else {
            SyncError::Network(error)
        }
    }

    /// Transport-level failures: the request never got an answer.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Timeout)
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, SyncError::Channel(_) | SyncError::WebSocket(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::WebSocket(Box::new(error))
    }
}
