//! Caller-facing spark service.
//!
//! Surfaces (screen focus, background fetch, CLI) call into this type. It
//! never lets a raw error reach `get_todays_spark`; failures become `None`
//! after logging and the next call re-enters at the batch check.

use crate::cache::{MemorySparkCache, NextSparkCache};
use crate::clock::{Clock, SystemClock};
use crate::delivery::{DaySummary, Delivery, DeliverySelector};
use crate::error::SparkCoreError;
use crate::lock::GenerationLock;
use crate::milestones::{MilestoneTracker, RecommendationSource};
use crate::orchestrator::{BatchOrchestrator, BatchSettings, EnsureOutcome};
use crate::sampler::TopicSampler;
use chrono::Duration;
use log::{debug, info, warn};
use spark_rs_config::SparkConfig;
use spark_rs_provider::{CompletionBackend, ContentGenerator, EmbeddingBackend, EmbeddingClient};
use spark_rs_store::{Interaction, InteractionOutcome, Reaction, Spark, SparkStore, StoreError};
use std::sync::Arc;
use uuid::Uuid;

/// Result of recording a reaction.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkOutcome {
    pub outcome: InteractionOutcome,
    /// Recommendation stored because this reaction crossed a milestone.
    pub recommendation: Option<Spark>,
}

/// Entry point for daily spark delivery.
#[derive(Clone)]
pub struct SparkService {
    store: Arc<dyn SparkStore>,
    clock: Arc<dyn Clock>,
    orchestrator: BatchOrchestrator,
    delivery: DeliverySelector,
    milestones: MilestoneTracker,
}

impl std::fmt::Debug for SparkService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparkService")
            .field("settings", &self.orchestrator.settings())
            .finish()
    }
}

impl SparkService {
    /// Start building a service from config.
    pub fn builder(config: SparkConfig) -> SparkServiceBuilder {
        SparkServiceBuilder::new(config)
    }

    /// Today's next spark, generating the batch first if needed.
    ///
    /// Returns `None` when nothing is available yet, every spark has been
    /// reacted to, or anything failed.
    pub async fn get_todays_spark(
        &self,
        user_id: &str,
        preferred_topics: &[String],
        preferences: &str,
    ) -> Option<Spark> {
        match self
            .todays_delivery(user_id, preferred_topics, preferences)
            .await
        {
            Ok(delivery) => delivery.into_spark(),
            Err(err) => {
                warn!("no spark available (user_id={user_id}): {err}");
                None
            }
        }
    }

    /// Detailed form of `get_todays_spark`.
    pub async fn todays_delivery(
        &self,
        user_id: &str,
        preferred_topics: &[String],
        preferences: &str,
    ) -> Result<Delivery, SparkCoreError> {
        validate_user(user_id)?;
        if let Some(spark) = self.delivery.cached(user_id).await? {
            debug!("serving cached spark (user_id={user_id}, spark_id={})", spark.id);
            return Ok(Delivery::Ready(spark));
        }

        match self
            .orchestrator
            .ensure_batch(user_id, preferred_topics, preferences)
            .await
        {
            Ok(EnsureOutcome::AlreadyComplete { .. }) | Ok(EnsureOutcome::Generated(_)) => {}
            Err(SparkCoreError::LockUnavailable) => {
                info!("generation running elsewhere (user_id={user_id})");
            }
            Err(err) => return Err(err),
        }
        self.delivery.select(user_id).await
    }

    /// Generate today's batch if it is missing.
    pub async fn ensure_batch(
        &self,
        user_id: &str,
        preferred_topics: &[String],
        preferences: &str,
    ) -> Result<EnsureOutcome, SparkCoreError> {
        validate_user(user_id)?;
        self.orchestrator
            .ensure_batch(user_id, preferred_topics, preferences)
            .await
    }

    /// Record a reaction, invalidate the next-spark cache, and check milestones.
    ///
    /// `spark_index` is the batch position the caller displayed; a mismatch is
    /// logged but does not reject the reaction.
    pub async fn mark_interacted(
        &self,
        user_id: &str,
        spark_id: Uuid,
        spark_index: u32,
        reaction: Reaction,
    ) -> Result<MarkOutcome, SparkCoreError> {
        validate_user(user_id)?;
        let spark = self
            .store
            .spark(user_id, spark_id)
            .await?
            .ok_or(SparkCoreError::Store(StoreError::NotFound(spark_id)))?;
        if spark.batch_index != spark_index {
            warn!(
                "spark index mismatch (user_id={user_id}, spark_id={spark_id}, expected={}, got={spark_index})",
                spark.batch_index
            );
        }

        let outcome = self
            .store
            .record_interaction(Interaction {
                user_id: user_id.to_string(),
                spark_id,
                reaction,
                created_at: self.clock.now(),
            })
            .await?;
        self.delivery.invalidate(user_id);
        info!("interaction recorded (user_id={user_id}, spark_id={spark_id}, reaction={reaction}, outcome={outcome:?})");

        let recommendation = match self
            .milestones
            .on_interaction(user_id, reaction, outcome)
            .await
        {
            Ok(recommendation) => recommendation,
            Err(err) => {
                warn!("milestone handling failed (user_id={user_id}): {err}");
                None
            }
        };
        if recommendation.is_some() {
            self.delivery.invalidate(user_id);
        }

        Ok(MarkOutcome {
            outcome,
            recommendation,
        })
    }

    /// True once today's batch is complete; store failures read as false.
    pub async fn has_batch_for_today(&self, user_id: &str) -> bool {
        match self.orchestrator.has_batch_for_today(user_id).await {
            Ok(complete) => complete,
            Err(err) => {
                warn!("batch check failed (user_id={user_id}): {err}");
                false
            }
        }
    }

    /// Today's sparks and reaction status.
    pub async fn todays_summary(&self, user_id: &str) -> Result<DaySummary, SparkCoreError> {
        validate_user(user_id)?;
        self.delivery.summary(user_id).await
    }
}

fn validate_user(user_id: &str) -> Result<(), SparkCoreError> {
    if user_id.trim().is_empty() {
        return Err(SparkCoreError::InvalidRequest(
            "user id cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Builder wiring stores, providers, and collaborators into a `SparkService`.
pub struct SparkServiceBuilder {
    config: SparkConfig,
    store: Option<Arc<dyn SparkStore>>,
    completion: Option<Arc<dyn CompletionBackend>>,
    embedding: Option<Arc<dyn EmbeddingBackend>>,
    clock: Arc<dyn Clock>,
    cache: Arc<dyn NextSparkCache>,
    recommendations: Option<Arc<dyn RecommendationSource>>,
}

impl SparkServiceBuilder {
    pub fn new(config: SparkConfig) -> Self {
        Self {
            config,
            store: None,
            completion: None,
            embedding: None,
            clock: Arc::new(SystemClock),
            cache: Arc::new(MemorySparkCache::new()),
            recommendations: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn SparkStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn completion_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.completion = Some(backend);
        self
    }

    pub fn embedding_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedding = Some(backend);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn NextSparkCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn recommendations(mut self, source: Arc<dyn RecommendationSource>) -> Self {
        self.recommendations = Some(source);
        self
    }

    /// Validate config and assemble the service.
    pub fn build(self) -> Result<SparkService, SparkCoreError> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| SparkCoreError::InvalidRequest("store is required".to_string()))?;
        let completion = self.completion.ok_or_else(|| {
            SparkCoreError::InvalidRequest("completion backend is required".to_string())
        })?;
        let embedding = self.embedding.ok_or_else(|| {
            SparkCoreError::InvalidRequest("embedding backend is required".to_string())
        })?;

        let config = self.config;
        let clock = self.clock;
        let stale_after = i64::try_from(config.lock.stale_after_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let lock = GenerationLock::new(store.clone(), clock.clone(), stale_after);
        let settings = BatchSettings::from_config(&config);
        let orchestrator = BatchOrchestrator::new(
            store.clone(),
            ContentGenerator::from_config(completion, &config.provider),
            EmbeddingClient::from_config(embedding, &config.provider),
            TopicSampler::new(&config.topics),
            lock,
            clock.clone(),
            settings,
        );
        let delivery = DeliverySelector::new(
            store.clone(),
            self.cache,
            clock.clone(),
            settings.size,
        );
        let milestones = MilestoneTracker::new(
            store.clone(),
            clock.clone(),
            self.recommendations,
            config.milestones.positive_reaction_thresholds.clone(),
        );

        debug!(
            "spark service built (batch_size={}, threshold={})",
            settings.size, settings.similarity_threshold
        );
        Ok(SparkService {
            store,
            clock,
            orchestrator,
            delivery,
            milestones,
        })
    }
}
