//! Records persisted by spark stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A committed unit of content owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spark {
    /// Identifier assigned at commit time.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Short content shown first.
    pub content: String,
    /// Expanded narrative.
    pub details: String,
    /// Topic label from the configured vocabulary.
    pub topic: String,
    /// Position inside the day's batch (1..=N); 0 for recommendations.
    pub batch_index: u32,
    /// True for sparks derived from an engagement milestone.
    pub is_recommendation: bool,
    /// Commit timestamp (UTC).
    pub created_at: DateTime<Utc>,
}

/// Content produced by a generator, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparkCandidate {
    pub content: String,
    pub details: String,
    pub topic: String,
}

/// A user's reaction to a spark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Dislike,
    Like,
    Love,
}

impl Reaction {
    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Reaction::Dislike => "dislike",
            Reaction::Like => "like",
            Reaction::Love => "love",
        }
    }

    /// Likes and loves count toward engagement milestones.
    pub fn is_positive(self) -> bool {
        matches!(self, Reaction::Like | Reaction::Love)
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reaction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dislike" => Ok(Reaction::Dislike),
            "like" => Ok(Reaction::Like),
            "love" => Ok(Reaction::Love),
            other => Err(format!("unknown reaction '{other}'")),
        }
    }
}

/// Recorded reaction, unique per (user, spark).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: String,
    pub spark_id: Uuid,
    pub reaction: Reaction,
    pub created_at: DateTime<Utc>,
}

/// Result of writing an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// First reaction for this spark.
    Recorded,
    /// An earlier reaction was replaced.
    Replaced { previous: Reaction },
}

/// Generation lock row for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRecord {
    pub acquired_at: DateTime<Utc>,
}

/// Half-open UTC range `[start, end)` covering one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    /// True when `instant` falls inside the window.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// Input to the similarity-gated commit.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub user_id: String,
    pub candidate: SparkCandidate,
    pub embedding: Vec<f32>,
    /// Reject when any prior spark scores at or above this value.
    pub threshold: f32,
    /// Day the spark belongs to; used for the capacity check.
    pub window: DayWindow,
    /// Maximum number of batch sparks allowed in `window`.
    pub capacity: usize,
    pub created_at: DateTime<Utc>,
}

/// Successful commit plus the scores computed against prior sparks.
#[derive(Debug, Clone)]
pub struct CommittedSpark {
    pub spark: Spark,
    pub similarity_scores: Vec<f32>,
}

impl CommittedSpark {
    /// Highest score observed during the commit, if any prior spark existed.
    pub fn max_score(&self) -> Option<f32> {
        self.similarity_scores.iter().copied().reduce(f32::max)
    }
}
