//! Embedding client for candidate sparks.

use crate::backend::EmbeddingBackend;
use crate::{ProviderError, RetryPolicy};
use log::debug;
use spark_rs_config::ProviderConfig;
use std::sync::Arc;

/// Separator placed between content and details before embedding.
const SEPARATOR: &str = "\n\n";

/// Embeds a spark's full text into a fixed-length vector.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    retry: RetryPolicy,
    dimensions: usize,
}

impl EmbeddingClient {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, retry: RetryPolicy, dimensions: usize) -> Self {
        Self {
            backend,
            retry,
            dimensions,
        }
    }

    pub fn from_config(backend: Arc<dyn EmbeddingBackend>, config: &ProviderConfig) -> Self {
        Self::new(
            backend,
            RetryPolicy::from_config(config),
            config.embedding_dimensions,
        )
    }

    /// Expected vector length.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed content and details together.
    pub async fn embed(&self, content: &str, details: &str) -> Result<Vec<f32>, ProviderError> {
        let input = format!("{content}{SEPARATOR}{details}");
        let vector = self
            .retry
            .run(
                "embedding",
                || {
                    let backend = Arc::clone(&self.backend);
                    let input = input.clone();
                    async move { backend.embed(&input).await }
                },
                |attempts| {
                    ProviderError::Embedding(format!(
                        "rate limited on all {attempts} attempts"
                    ))
                },
            )
            .await?;

        if vector.is_empty() {
            return Err(ProviderError::Embedding(
                "provider returned an empty vector".to_string(),
            ));
        }
        if vector.len() != self.dimensions {
            return Err(ProviderError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        debug!("embedding ready (dimensions={})", vector.len());
        Ok(vector)
    }
}
