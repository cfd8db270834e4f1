//! Durable storage for sparks, embeddings, interactions, and generation locks.

pub mod error;
pub mod model;
pub mod similarity;
pub mod sqlite;
pub mod store;

/// Store error type.
pub use error::StoreError;
/// Spark, interaction, and lock records.
pub use model::{
    CommitRequest, CommittedSpark, DayWindow, Interaction, InteractionOutcome, LockRecord,
    Reaction, Spark, SparkCandidate,
};
/// Similarity metric used by the commit gate.
pub use similarity::cosine_similarity;
/// SQLite-backed store.
pub use sqlite::SqliteSparkStore;
/// Store interface used by the core service.
pub use store::SparkStore;
