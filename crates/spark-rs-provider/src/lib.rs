//! Generative-text provider seam: HTTP backend, content generator, embedding client.

pub mod backend;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod openai;
pub mod retry;

pub use backend::{CompletionBackend, CompletionRequest, EmbeddingBackend};
pub use embedding::EmbeddingClient;
pub use error::ProviderError;
pub use generator::{ContentGenerator, RhetoricalForm};
pub use openai::OpenAiBackend;
pub use retry::RetryPolicy;
