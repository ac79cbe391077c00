use rust_decimal::Decimal;
use thiserror::Error;

/// SQLite primary result code for a full database or disk.
const SQLITE_FULL: &str = "13";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Local storage quota exceeded")]
    QuotaExceeded,

    #[error("Not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            StorageError::QuotaExceeded => true,
            StorageError::Database(sqlx::Error::Database(e)) => {
                e.code().as_deref() == Some(SQLITE_FULL)
            }
            _ => false,
        }
    }

    /// Folds driver-level "disk full" failures into [`StorageError::QuotaExceeded`].
    pub(crate) fn classify(error: sqlx::Error) -> Self {
        let error = StorageError::Database(error);
        if error.is_quota_exceeded() {
            StorageError::QuotaExceeded
        } else {
            error
        }
    }
}

/// Malformed judge input, rejected before any network or storage access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Score {0} is outside the 0-10 range")]
    ScoreOutOfRange(Decimal),

    #[error("Score {0} is not a multiple of 0.5")]
    InvalidStep(Decimal),

    #[error("Coefficient {0} must not be negative")]
    NegativeCoefficient(Decimal),

    #[error("Score sheet has no parameters")]
    EmptyScoreSheet,
}
