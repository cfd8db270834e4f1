//! Daily spark pipeline: batch orchestration, generation lock, and delivery.
//!
//! `SparkService` is the entry point. It checks whether today's batch exists,
//! generates the missing sparks under a storage-backed lock, and serves the
//! first spark the user has not reacted to.

pub mod cache;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod lock;
pub mod milestones;
pub mod orchestrator;
pub mod sampler;
pub mod service;

pub use cache::{CachedSpark, FileSparkCache, MemorySparkCache, NextSparkCache};
pub use clock::{Clock, SystemClock, day_window_in};
pub use delivery::{DaySummary, Delivery, DeliverySelector};
pub use error::SparkCoreError;
pub use lock::{GenerationLock, LockState, StaleReason};
pub use milestones::{MilestoneTracker, RecommendationSource};
pub use orchestrator::{
    BatchOrchestrator, BatchReport, BatchSettings, BatchState, EnsureOutcome, SlotOutcome,
};
pub use sampler::TopicSampler;
pub use service::{MarkOutcome, SparkService, SparkServiceBuilder};
