//! Store interface for sparks, interactions, and generation locks.

use crate::{
    CommitRequest, CommittedSpark, DayWindow, Interaction, InteractionOutcome, LockRecord, Spark,
    SparkCandidate, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Durable source of truth for committed sparks.
///
/// Implementations must make `commit_if_unique` atomic with respect to other
/// commits for the same user, including commits issued by other processes
/// sharing the same storage.
#[async_trait]
pub trait SparkStore: Send + Sync {
    /// All sparks for a user created inside `window`, ordered by batch index
    /// then creation time. Recommendation sparks are included.
    async fn sparks_in_window(
        &self,
        user_id: &str,
        window: DayWindow,
    ) -> Result<Vec<Spark>, StoreError>;

    /// Fetch one spark owned by `user_id`.
    async fn spark(&self, user_id: &str, spark_id: Uuid) -> Result<Option<Spark>, StoreError>;

    /// Compare the candidate embedding against every stored embedding of the
    /// user and insert it only when all scores are below the threshold and the
    /// day still has capacity.
    async fn commit_if_unique(&self, request: CommitRequest)
    -> Result<CommittedSpark, StoreError>;

    /// Insert a recommendation spark without the similarity gate.
    async fn insert_recommendation(
        &self,
        user_id: &str,
        candidate: SparkCandidate,
        created_at: DateTime<Utc>,
    ) -> Result<Spark, StoreError>;

    /// Write the user's reaction to a spark, replacing an earlier one.
    async fn record_interaction(
        &self,
        interaction: Interaction,
    ) -> Result<InteractionOutcome, StoreError>;

    /// Subset of `spark_ids` the user has reacted to.
    async fn reacted_spark_ids(
        &self,
        user_id: &str,
        spark_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, StoreError>;

    /// Number of like/love reactions recorded by the user.
    async fn count_positive_interactions(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Recommendation sparks for a user created inside `window`.
    async fn count_recommendations(
        &self,
        user_id: &str,
        window: DayWindow,
    ) -> Result<u64, StoreError>;

    /// Mark the milestone at `threshold` as fired for the user. Returns false
    /// when it had already fired.
    async fn claim_milestone(
        &self,
        user_id: &str,
        threshold: u64,
        fired_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Forget a claimed milestone so it can fire again.
    async fn release_milestone(&self, user_id: &str, threshold: u64) -> Result<(), StoreError>;

    /// Current lock row for the user, if any.
    async fn read_lock(&self, user_id: &str) -> Result<Option<LockRecord>, StoreError>;

    /// Write `record` only if the stored lock still matches `expected`
    /// (`None` meaning no row). Returns whether the write happened.
    async fn swap_lock(
        &self,
        user_id: &str,
        expected: Option<LockRecord>,
        record: LockRecord,
    ) -> Result<bool, StoreError>;

    /// Remove the user's lock row. Missing rows are not an error.
    async fn delete_lock(&self, user_id: &str) -> Result<(), StoreError>;
}
