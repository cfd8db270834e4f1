//! Backend traits implemented by concrete providers and test doubles.

use crate::ProviderError;
use async_trait::async_trait;
use serde_json::Value;

/// One structured completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    /// JSON schema the response must satisfy.
    pub schema: Value,
    /// Sampling seed; differs between attempts.
    pub seed: u64,
    pub temperature: f32,
}

/// Produces raw JSON text for a completion request.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// Produces an embedding vector for a piece of text.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, ProviderError>;
}
