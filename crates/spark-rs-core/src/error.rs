//! Error types for the spark core crate.

use spark_rs_config::ConfigError;
use spark_rs_provider::ProviderError;
use spark_rs_store::StoreError;
use thiserror::Error;

/// Errors returned by orchestration, delivery, and interaction operations.
#[derive(Debug, Error)]
pub enum SparkCoreError {
    /// Another execution context holds a fresh generation lock.
    #[error("generation already in progress")]
    LockUnavailable,
    /// A batch slot could not be filled.
    #[error("batch generation failed at slot {batch_index} after {attempts} attempts: {cause}")]
    BatchGenerationFailed {
        batch_index: u32,
        attempts: u32,
        #[source]
        cause: Box<SparkCoreError>,
    },
    /// Provider error.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Caller supplied an unusable argument.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Local cache could not be read or written.
    #[error("cache error: {0}")]
    Cache(String),
    /// External recommendation lookup failed.
    #[error("recommendation lookup failed: {0}")]
    Recommendation(String),
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
