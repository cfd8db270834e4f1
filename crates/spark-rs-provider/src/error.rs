//! Error types for provider calls.

use std::time::Duration;

/// Errors returned by provider backends and clients.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider returned no usable candidate.
    #[error("generation failed: {0}")]
    Generation(String),
    /// Rate-limit retries were used up without a response.
    #[error("generation retries exhausted after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },
    /// The provider returned no usable vector.
    #[error("embedding failed: {0}")]
    Embedding(String),
    /// The provider asked the caller to slow down.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
    /// The transport gave up waiting for a response.
    #[error("provider request timed out: {0}")]
    Timeout(String),
    /// Backend could not be constructed.
    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl ProviderError {
    /// Failures worth another attempt with a fresh request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_) | ProviderError::RateLimited { .. }
        )
    }
}
