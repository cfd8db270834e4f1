//! Configuration schema for the spark service.

use serde::{Deserialize, Serialize};

/// Root config for the spark service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SparkConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub milestones: MilestoneConfig,
}

impl SparkConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> SparkConfigBuilder {
        SparkConfigBuilder::new()
    }
}

/// Builder for assembling a `SparkConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct SparkConfigBuilder {
    config: SparkConfig,
}

impl SparkConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: SparkConfig::default(),
        }
    }

    /// Replace the batch sizing configuration.
    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.config.batch = batch;
        self
    }

    /// Replace the similarity gate configuration.
    pub fn similarity(mut self, similarity: SimilarityConfig) -> Self {
        self.config.similarity = similarity;
        self
    }

    /// Replace the generation lock configuration.
    pub fn lock(mut self, lock: LockConfig) -> Self {
        self.config.lock = lock;
        self
    }

    /// Replace the topic vocabulary and sampling configuration.
    pub fn topics(mut self, topics: TopicsConfig) -> Self {
        self.config.topics = topics;
        self
    }

    /// Replace the generative-text provider configuration.
    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.config.provider = provider;
        self
    }

    /// Replace the durable store configuration.
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.config.store = store;
        self
    }

    /// Replace the local cache configuration.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// Replace the engagement milestone configuration.
    pub fn milestones(mut self, milestones: MilestoneConfig) -> Self {
        self.config.milestones = milestones;
        self
    }

    /// Finalize and return the built `SparkConfig`.
    pub fn build(self) -> SparkConfig {
        self.config
    }
}

/// Daily batch sizing and slot retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of sparks generated per user per local day.
    #[serde(default = "default_batch_size")]
    pub size: usize,
    /// Attempts allowed for a single batch slot before the batch fails.
    #[serde(default = "default_max_attempts_per_slot")]
    pub max_attempts_per_slot: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
            max_attempts_per_slot: default_max_attempts_per_slot(),
        }
    }
}

fn default_batch_size() -> usize {
    7
}

fn default_max_attempts_per_slot() -> u32 {
    3
}

/// Similarity gate applied when committing a spark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Candidates scoring at or above this against any prior spark are rejected.
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: default_similarity_threshold(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.85
}

/// Generation lock staleness policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Age after which a held lock is treated as abandoned.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    5 * 60
}

/// Topic vocabulary and exploration sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Fixed vocabulary every spark topic is drawn from.
    #[serde(default = "default_topic_vocabulary")]
    pub vocabulary: Vec<String>,
    /// Probability of replacing the user's preferences with unrelated topics.
    #[serde(default = "default_exploration_rate")]
    pub exploration_rate: f64,
    /// Upper bound on topics drawn for an exploration call.
    #[serde(default = "default_max_exploration_topics")]
    pub max_exploration_topics: usize,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            vocabulary: default_topic_vocabulary(),
            exploration_rate: default_exploration_rate(),
            max_exploration_topics: default_max_exploration_topics(),
        }
    }
}

/// Default topic vocabulary.
pub fn default_topic_vocabulary() -> Vec<String> {
    [
        "Science",
        "History",
        "Technology",
        "Art",
        "Philosophy",
        "Psychology",
        "Nature",
        "Space",
        "Music",
        "Literature",
        "Health",
        "Economics",
        "Mathematics",
        "Culture",
        "Language",
        "Food",
    ]
    .iter()
    .map(|topic| topic.to_string())
    .collect()
}

fn default_exploration_rate() -> f64 {
    0.2
}

fn default_max_exploration_topics() -> usize {
    2
}

/// OpenAI-compatible generative-text provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Rate-limit retries per generation call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_temperature() -> f32 {
    0.9
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

/// Durable store location.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// SQLite database path; defaults to `~/.spark/spark.db`.
    #[serde(default)]
    pub path: Option<String>,
}

/// Device-local next-spark cache location.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Cache directory; defaults to `~/.spark/cache`.
    #[serde(default)]
    pub path: Option<String>,
}

/// Engagement milestones that trigger a recommendation lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneConfig {
    /// Positive reaction counts (like or love) at which a milestone fires.
    #[serde(default = "default_positive_reaction_thresholds")]
    pub positive_reaction_thresholds: Vec<u64>,
}

impl Default for MilestoneConfig {
    fn default() -> Self {
        Self {
            positive_reaction_thresholds: default_positive_reaction_thresholds(),
        }
    }
}

fn default_positive_reaction_thresholds() -> Vec<u64> {
    vec![5, 15, 30]
}
