//! Daily batch orchestrator.
//!
//! Per (user, local day) the orchestrator moves through
//! `Checking -> {Complete | Generating -> Complete | Failed}`. Generation only
//! starts under the storage-backed lock and fills slots one at a time so each
//! similarity check sees everything committed earlier in the run.

use crate::clock::Clock;
use crate::error::SparkCoreError;
use crate::lock::GenerationLock;
use crate::sampler::TopicSampler;
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use spark_rs_config::SparkConfig;
use spark_rs_provider::{ContentGenerator, EmbeddingClient, ProviderError};
use spark_rs_store::{CommitRequest, CommittedSpark, DayWindow, SparkStore, StoreError};
use std::sync::Arc;
use uuid::Uuid;

/// Observable orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Unchecked,
    Checking,
    Generating,
    Complete,
    Failed,
}

/// A filled batch slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotOutcome {
    pub batch_index: u32,
    pub spark_id: Uuid,
    pub topic: String,
    /// Attempts charged against the slot budget, including the successful one.
    pub attempts: u32,
    pub similarity_scores: Vec<f32>,
}

/// Summary of a generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub user_id: String,
    pub date: NaiveDate,
    /// Batch sparks already present when generation started.
    pub existing: usize,
    pub slots: Vec<SlotOutcome>,
    /// Another writer filled the remaining slots during this run.
    pub completed_elsewhere: bool,
}

impl BatchReport {
    pub fn total_attempts(&self) -> u32 {
        self.slots.iter().map(|slot| slot.attempts).sum()
    }
}

/// Result of `ensure_batch`.
#[derive(Debug, Clone, PartialEq)]
pub enum EnsureOutcome {
    /// The day already held a full batch.
    AlreadyComplete { count: usize },
    /// This call generated the missing slots.
    Generated(BatchReport),
}

/// Slot loop result short of failure.
enum SlotFill {
    Filled(SlotOutcome),
    BatchFull,
}

/// Batch sizing and gate settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSettings {
    pub size: usize,
    pub max_attempts_per_slot: u32,
    pub similarity_threshold: f32,
}

impl BatchSettings {
    pub fn from_config(config: &SparkConfig) -> Self {
        Self {
            size: config.batch.size,
            max_attempts_per_slot: config.batch.max_attempts_per_slot,
            similarity_threshold: config.similarity.threshold,
        }
    }
}

/// Drives topic sampling, generation, embedding, and gated commits.
#[derive(Clone)]
pub struct BatchOrchestrator {
    store: Arc<dyn SparkStore>,
    generator: ContentGenerator,
    embedder: EmbeddingClient,
    sampler: TopicSampler,
    lock: GenerationLock,
    clock: Arc<dyn Clock>,
    settings: BatchSettings,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn SparkStore>,
        generator: ContentGenerator,
        embedder: EmbeddingClient,
        sampler: TopicSampler,
        lock: GenerationLock,
        clock: Arc<dyn Clock>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            store,
            generator,
            embedder,
            sampler,
            lock,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> BatchSettings {
        self.settings
    }

    /// Number of batch (non-recommendation) sparks the user has in `window`.
    pub async fn batch_count(&self, user_id: &str, window: DayWindow) -> Result<usize, StoreError> {
        let sparks = self.store.sparks_in_window(user_id, window).await?;
        Ok(sparks.iter().filter(|spark| !spark.is_recommendation).count())
    }

    /// True once today's batch holds N sparks.
    pub async fn has_batch_for_today(&self, user_id: &str) -> Result<bool, StoreError> {
        let window = self.clock.today_window();
        Ok(self.batch_count(user_id, window).await? >= self.settings.size)
    }

    /// Make sure today's batch exists, generating missing slots if needed.
    pub async fn ensure_batch(
        &self,
        user_id: &str,
        preferred_topics: &[String],
        preferences: &str,
    ) -> Result<EnsureOutcome, SparkCoreError> {
        if preferred_topics.is_empty() {
            return Err(SparkCoreError::InvalidRequest(
                "preferred topics cannot be empty".to_string(),
            ));
        }

        let mut state = BatchState::Unchecked;
        transition(user_id, &mut state, BatchState::Checking);
        let date = self.clock.today();
        let window = self.clock.day_window(date);
        let count = self.batch_count(user_id, window).await?;
        if count >= self.settings.size {
            transition(user_id, &mut state, BatchState::Complete);
            return Ok(EnsureOutcome::AlreadyComplete { count });
        }

        if !self.lock.acquire(user_id).await? {
            info!("batch generation skipped; lock held elsewhere (user_id={user_id})");
            return Err(SparkCoreError::LockUnavailable);
        }

        transition(user_id, &mut state, BatchState::Generating);
        let result = self
            .generate_locked(user_id, preferred_topics, preferences, date, window)
            .await;
        self.lock.release(user_id).await;

        match &result {
            Ok(_) => transition(user_id, &mut state, BatchState::Complete),
            Err(err) => {
                transition(user_id, &mut state, BatchState::Failed);
                warn!("batch generation failed (user_id={user_id}): {err}");
            }
        }
        result
    }

    async fn generate_locked(
        &self,
        user_id: &str,
        preferred_topics: &[String],
        preferences: &str,
        date: NaiveDate,
        window: DayWindow,
    ) -> Result<EnsureOutcome, SparkCoreError> {
        // A concurrent run may have finished between the check and the lock.
        let existing = self.batch_count(user_id, window).await?;
        if existing >= self.settings.size {
            return Ok(EnsureOutcome::AlreadyComplete { count: existing });
        }

        let mut report = BatchReport {
            user_id: user_id.to_string(),
            date,
            existing,
            slots: Vec::new(),
            completed_elsewhere: false,
        };
        for slot in existing..self.settings.size {
            let batch_index = u32::try_from(slot + 1).unwrap_or(u32::MAX);
            match self
                .fill_slot(user_id, preferred_topics, preferences, window, batch_index)
                .await?
            {
                SlotFill::Filled(outcome) => report.slots.push(outcome),
                SlotFill::BatchFull => {
                    info!("batch completed by another writer (user_id={user_id})");
                    report.completed_elsewhere = true;
                    break;
                }
            }
        }

        info!(
            "batch complete (user_id={user_id}, date={date}, generated={}, attempts={})",
            report.slots.len(),
            report.total_attempts()
        );
        Ok(EnsureOutcome::Generated(report))
    }

    /// Fill one slot within the attempt budget.
    ///
    /// Similarity rejections and transport timeouts consume an attempt and
    /// retry with freshly sampled topics; anything else fails the batch.
    async fn fill_slot(
        &self,
        user_id: &str,
        preferred_topics: &[String],
        preferences: &str,
        window: DayWindow,
        batch_index: u32,
    ) -> Result<SlotFill, SparkCoreError> {
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.settings.max_attempts_per_slot {
            attempts += 1;
            match self
                .attempt(user_id, preferred_topics, preferences, window)
                .await
            {
                Ok(committed) => {
                    debug!(
                        "slot filled (user_id={user_id}, batch_index={}, attempts={attempts}, max_score={:?})",
                        committed.spark.batch_index,
                        committed.max_score()
                    );
                    return Ok(SlotFill::Filled(SlotOutcome {
                        batch_index: committed.spark.batch_index,
                        spark_id: committed.spark.id,
                        topic: committed.spark.topic,
                        attempts,
                        similarity_scores: committed.similarity_scores,
                    }));
                }
                Err(SparkCoreError::Store(StoreError::BatchFull { .. })) => {
                    return Ok(SlotFill::BatchFull);
                }
                Err(err @ SparkCoreError::Store(StoreError::TooSimilar { .. })) => {
                    info!(
                        "candidate rejected; regenerating (user_id={user_id}, batch_index={batch_index}, attempt={attempts}): {err}"
                    );
                    last_error = Some(err);
                }
                Err(err @ SparkCoreError::Provider(ProviderError::Timeout(_))) => {
                    warn!(
                        "provider timeout; retrying slot (user_id={user_id}, batch_index={batch_index}, attempt={attempts})"
                    );
                    last_error = Some(err);
                }
                Err(err) => {
                    return Err(SparkCoreError::BatchGenerationFailed {
                        batch_index,
                        attempts,
                        cause: Box::new(err),
                    });
                }
            }
        }

        Err(SparkCoreError::BatchGenerationFailed {
            batch_index,
            attempts,
            cause: Box::new(last_error.unwrap_or_else(|| {
                SparkCoreError::InvalidRequest("slot attempt budget is zero".to_string())
            })),
        })
    }

    /// One sample -> generate -> embed -> commit pass.
    async fn attempt(
        &self,
        user_id: &str,
        preferred_topics: &[String],
        preferences: &str,
        window: DayWindow,
    ) -> Result<CommittedSpark, SparkCoreError> {
        let topics = self.sampler.sample(preferred_topics);
        let candidate = self.generator.generate(&topics, preferences).await?;
        let embedding = self
            .embedder
            .embed(&candidate.content, &candidate.details)
            .await?;

        // Keep the spark on the day it was generated for even if midnight
        // passed during the provider calls.
        let created_at = self
            .clock
            .now()
            .clamp(window.start, window.end - Duration::milliseconds(1));
        let committed = self
            .store
            .commit_if_unique(CommitRequest {
                user_id: user_id.to_string(),
                candidate,
                embedding,
                threshold: self.settings.similarity_threshold,
                window,
                capacity: self.settings.size,
                created_at,
            })
            .await?;
        Ok(committed)
    }
}

fn transition(user_id: &str, state: &mut BatchState, next: BatchState) {
    debug!("batch state (user_id={user_id}, from={state:?}, to={next:?})");
    *state = next;
}
