//! Error types for store operations.

use uuid::Uuid;

/// Errors returned by spark stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The candidate is too close to a spark the user already has.
    #[error("candidate too similar to an existing spark (score={score:.3})")]
    TooSimilar { score: f32 },
    /// The day's batch already holds its full capacity.
    #[error("daily batch already full (count={count})")]
    BatchFull { count: usize },
    /// Referenced spark does not exist for the user.
    #[error("spark not found: {0}")]
    NotFound(Uuid),
    /// A stored or submitted record is malformed.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// The database worker is gone or failed to start.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
