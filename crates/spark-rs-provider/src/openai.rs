//! OpenAI-compatible HTTP backend.

use crate::backend::{CompletionBackend, CompletionRequest, EmbeddingBackend};
use crate::ProviderError;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use spark_rs_config::ProviderConfig;
use std::time::Duration;

/// Longest provider error body carried into an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Chat,
    Embeddings,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Chat => "chat/completions",
            Endpoint::Embeddings => "embeddings",
        }
    }

    fn failure(self, message: String) -> ProviderError {
        match self {
            Endpoint::Chat => ProviderError::Generation(message),
            Endpoint::Embeddings => ProviderError::Embedding(message),
        }
    }
}

/// Chat-completion and embedding client for OpenAI-compatible APIs.
#[derive(Clone)]
pub struct OpenAiBackend {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    embedding_dimensions: usize,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiBackend {
    /// Build a backend with an explicit key (or none, for local servers).
    pub fn new(config: &ProviderConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        Self::with_timeout(
            config,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Build a backend reading the key from `config.api_key_env`.
    pub fn from_env(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::Config(format!(
                    "environment variable {} is not set",
                    config.api_key_env
                ))
            })?;
        Self::new(config, Some(api_key))
    }

    /// Build a backend with a per-request timeout other than the configured one.
    pub fn with_timeout(
        config: &ProviderConfig,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Config(format!("http client: {err}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            embedding_dimensions: config.embedding_dimensions,
        })
    }

    async fn post(&self, endpoint: Endpoint, body: Value) -> Result<Value, ProviderError> {
        let url = format!("{}/{}", self.base_url, endpoint.path());
        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| transport_error(endpoint, err))?;
        let response = check_status(endpoint, response).await?;
        response
            .json::<Value>()
            .await
            .map_err(|err| transport_error(endpoint, err))
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.chat_model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": request.temperature,
            "seed": request.seed,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "spark",
                    "strict": true,
                    "schema": request.schema,
                },
            },
        });
        debug!(
            "chat completion request (model={}, seed={})",
            self.chat_model, request.seed
        );
        let value = self.post(Endpoint::Chat, body).await?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Generation("response contained no message content".into()))
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let body = json!({
            "model": self.embedding_model,
            "input": input,
            "dimensions": self.embedding_dimensions,
        });
        debug!(
            "embedding request (model={}, input_len={})",
            self.embedding_model,
            input.len()
        );
        let value = self.post(Endpoint::Embeddings, body).await?;
        let Some(values) = value["data"][0]["embedding"].as_array() else {
            return Err(ProviderError::Embedding(
                "response contained no embedding".to_string(),
            ));
        };
        values
            .iter()
            .map(|entry| {
                entry.as_f64().map(|value| value as f32).ok_or_else(|| {
                    ProviderError::Embedding("embedding contains a non-numeric value".to_string())
                })
            })
            .collect()
    }
}

/// Map non-success statuses to typed errors.
async fn check_status(endpoint: Endpoint, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        warn!(
            "provider rate limit (endpoint={}, retry_after_secs={:?})",
            endpoint.path(),
            retry_after.map(|delay| delay.as_secs())
        );
        return Err(ProviderError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(endpoint.failure(format!("HTTP {}: {excerpt}", status.as_u16())))
}

fn transport_error(endpoint: Endpoint, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(format!("{}: {err}", endpoint.path()))
    } else {
        endpoint.failure(format!("{}: {err}", endpoint.path()))
    }
}
