//! Delivery selector: the first unreacted spark of today.

use crate::cache::{CachedSpark, NextSparkCache};
use crate::clock::Clock;
use crate::error::SparkCoreError;
use chrono::NaiveDate;
use log::{debug, warn};
use spark_rs_store::{Spark, SparkStore};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// What the caller should show for today.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Next spark to show.
    Ready(Spark),
    /// Every spark for today has a reaction.
    AllConsumed,
    /// Today's batch is not complete yet.
    NotYetAvailable,
}

impl Delivery {
    pub fn into_spark(self) -> Option<Spark> {
        match self {
            Delivery::Ready(spark) => Some(spark),
            Delivery::AllConsumed | Delivery::NotYetAvailable => None,
        }
    }
}

/// Today's sparks and their reaction status.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySummary {
    pub date: NaiveDate,
    /// Batch sparks committed today.
    pub batch_count: usize,
    /// Recommendation sparks stored today.
    pub recommendation_count: usize,
    /// Sparks without a reaction, in delivery order.
    pub unreacted: Vec<Spark>,
    pub complete: bool,
}

/// Picks the next spark from the durable store, using the cache as a shortcut.
#[derive(Clone)]
pub struct DeliverySelector {
    store: Arc<dyn SparkStore>,
    cache: Arc<dyn NextSparkCache>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl DeliverySelector {
    pub fn new(
        store: Arc<dyn SparkStore>,
        cache: Arc<dyn NextSparkCache>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            batch_size,
        }
    }

    /// Cached next spark, if it is for today and still unreacted in the store.
    pub async fn cached(&self, user_id: &str) -> Result<Option<Spark>, SparkCoreError> {
        let entry = match self.cache.get(user_id) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!("next spark cache unreadable (user_id={user_id}): {err}");
                self.invalidate(user_id);
                return Ok(None);
            }
        };

        if entry.date != self.clock.today() {
            debug!("cached spark is from another day (user_id={user_id})");
            self.invalidate(user_id);
            return Ok(None);
        }
        // A recommendation stored after the entry was written jumps the queue.
        let recommendations = self
            .store
            .count_recommendations(user_id, self.clock.day_window(entry.date))
            .await?;
        if recommendations != entry.recommendations {
            debug!(
                "recommendations changed since caching (user_id={user_id}, cached={}, stored={recommendations})",
                entry.recommendations
            );
            self.invalidate(user_id);
            return Ok(None);
        }
        let spark_id = entry.spark.id;
        if self.store.spark(user_id, spark_id).await?.is_none()
            || !self
                .store
                .reacted_spark_ids(user_id, &[spark_id])
                .await?
                .is_empty()
        {
            debug!("cached spark no longer deliverable (user_id={user_id}, spark_id={spark_id})");
            self.invalidate(user_id);
            return Ok(None);
        }
        Ok(Some(entry.spark))
    }

    /// Today's sparks grouped by reaction status.
    pub async fn summary(&self, user_id: &str) -> Result<DaySummary, SparkCoreError> {
        let date = self.clock.today();
        let sparks = self
            .store
            .sparks_in_window(user_id, self.clock.day_window(date))
            .await?;
        let ids: Vec<Uuid> = sparks.iter().map(|spark| spark.id).collect();
        let reacted = self.store.reacted_spark_ids(user_id, &ids).await?;

        let (recommendations, batch): (Vec<Spark>, Vec<Spark>) =
            sparks.into_iter().partition(|spark| spark.is_recommendation);
        let batch_count = batch.len();
        let recommendation_count = recommendations.len();
        let unreacted = delivery_order(recommendations, batch, &reacted);

        Ok(DaySummary {
            date,
            batch_count,
            recommendation_count,
            unreacted,
            complete: batch_count >= self.batch_size,
        })
    }

    /// Select the next spark for today and refresh the cache.
    pub async fn select(&self, user_id: &str) -> Result<Delivery, SparkCoreError> {
        if let Some(spark) = self.cached(user_id).await? {
            debug!("next spark served from cache (user_id={user_id}, spark_id={})", spark.id);
            return Ok(Delivery::Ready(spark));
        }

        let summary = self.summary(user_id).await?;
        if !summary.complete {
            return Ok(Delivery::NotYetAvailable);
        }
        let Some(next) = summary.unreacted.into_iter().next() else {
            debug!("all sparks consumed (user_id={user_id}, date={})", summary.date);
            return Ok(Delivery::AllConsumed);
        };

        let entry = CachedSpark {
            date: summary.date,
            spark: next.clone(),
            recommendations: summary.recommendation_count as u64,
        };
        if let Err(err) = self.cache.put(user_id, &entry) {
            warn!("failed to cache next spark (user_id={user_id}): {err}");
        }
        Ok(Delivery::Ready(next))
    }

    /// Drop the cached entry; failures are logged.
    pub fn invalidate(&self, user_id: &str) {
        if let Err(err) = self.cache.invalidate(user_id) {
            warn!("failed to invalidate next spark cache (user_id={user_id}): {err}");
        }
    }
}

/// Unreacted recommendations first (oldest first), then batch sparks by index.
fn delivery_order(
    mut recommendations: Vec<Spark>,
    mut batch: Vec<Spark>,
    reacted: &HashSet<Uuid>,
) -> Vec<Spark> {
    recommendations.sort_by_key(|spark| spark.created_at);
    batch.sort_by_key(|spark| (spark.batch_index, spark.created_at));
    recommendations
        .into_iter()
        .chain(batch)
        .filter(|spark| !reacted.contains(&spark.id))
        .collect()
}
