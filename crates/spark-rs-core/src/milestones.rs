//! Engagement milestones and recommendation sparks.

use crate::clock::Clock;
use crate::error::SparkCoreError;
use async_trait::async_trait;
use log::{debug, info, warn};
use spark_rs_store::{InteractionOutcome, Reaction, Spark, SparkCandidate, SparkStore};
use std::sync::Arc;

/// External lookup for content to recommend once a milestone fires.
#[async_trait]
pub trait RecommendationSource: Send + Sync {
    /// Content for `user_id` at `milestone` positive reactions, if any.
    async fn recommend(
        &self,
        user_id: &str,
        milestone: u64,
    ) -> Result<Option<SparkCandidate>, SparkCoreError>;
}

/// Watches positive-reaction counts and stores recommendation sparks.
#[derive(Clone)]
pub struct MilestoneTracker {
    store: Arc<dyn SparkStore>,
    clock: Arc<dyn Clock>,
    source: Option<Arc<dyn RecommendationSource>>,
    thresholds: Vec<u64>,
}

impl MilestoneTracker {
    pub fn new(
        store: Arc<dyn SparkStore>,
        clock: Arc<dyn Clock>,
        source: Option<Arc<dyn RecommendationSource>>,
        thresholds: Vec<u64>,
    ) -> Self {
        Self {
            store,
            clock,
            source,
            thresholds,
        }
    }

    /// React to a recorded interaction; returns the stored recommendation
    /// when this interaction crossed a milestone.
    pub async fn on_interaction(
        &self,
        user_id: &str,
        reaction: Reaction,
        outcome: InteractionOutcome,
    ) -> Result<Option<Spark>, SparkCoreError> {
        if !reaction.is_positive() {
            return Ok(None);
        }
        // Swapping like for love does not raise the count.
        if matches!(outcome, InteractionOutcome::Replaced { previous } if previous.is_positive()) {
            return Ok(None);
        }

        let count = self.store.count_positive_interactions(user_id).await?;
        if !self.thresholds.contains(&count) {
            return Ok(None);
        }
        let Some(source) = &self.source else {
            debug!("milestone reached without a recommendation source (user_id={user_id}, count={count})");
            return Ok(None);
        };
        // The count can fall back to a threshold when a reaction is changed
        // to dislike and back; each milestone fires once per user.
        if !self
            .store
            .claim_milestone(user_id, count, self.clock.now())
            .await?
        {
            debug!("milestone already fired (user_id={user_id}, count={count})");
            return Ok(None);
        }

        info!("engagement milestone reached (user_id={user_id}, count={count})");
        match self.recommend(source.as_ref(), user_id, count).await {
            Ok(spark) => Ok(spark),
            Err(err) => {
                if let Err(release_err) = self.store.release_milestone(user_id, count).await {
                    warn!(
                        "failed to release milestone (user_id={user_id}, count={count}): {release_err}"
                    );
                }
                Err(err)
            }
        }
    }

    async fn recommend(
        &self,
        source: &dyn RecommendationSource,
        user_id: &str,
        count: u64,
    ) -> Result<Option<Spark>, SparkCoreError> {
        let Some(candidate) = source.recommend(user_id, count).await? else {
            return Ok(None);
        };
        let spark = self
            .store
            .insert_recommendation(user_id, candidate, self.clock.now())
            .await?;
        info!(
            "recommendation stored (user_id={user_id}, spark_id={}, topic={})",
            spark.id, spark.topic
        );
        Ok(Some(spark))
    }
}
