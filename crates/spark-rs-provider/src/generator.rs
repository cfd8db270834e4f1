//! Content generator: prompt construction, rate-limit retries, and output validation.

use crate::backend::{CompletionBackend, CompletionRequest};
use crate::{ProviderError, RetryPolicy};
use log::{debug, info};
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use serde_json::{Value, json};
use spark_rs_config::ProviderConfig;
use spark_rs_store::SparkCandidate;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You write short, surprising, accurate facts for a daily reading app. \
Respond with JSON only. `content` is 100 to 200 characters. `details` is plain prose of at most \
200 words that expands on the content. Do not use headings, lists, or any section markup. \
Do not include calls to action. Do not name the style you were asked to write in.";

/// Rhetorical framing requested for one generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhetoricalForm {
    Question,
    Perspective,
    Insight,
}

impl RhetoricalForm {
    pub const ALL: [RhetoricalForm; 3] = [
        RhetoricalForm::Question,
        RhetoricalForm::Perspective,
        RhetoricalForm::Insight,
    ];

    fn instruction(self) -> &'static str {
        match self {
            RhetoricalForm::Question => {
                "Open the content with a thought-provoking question the fact then answers."
            }
            RhetoricalForm::Perspective => {
                "Frame the content as an unexpected way of looking at something familiar."
            }
            RhetoricalForm::Insight => {
                "State the content as a crisp, counterintuitive observation."
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    content: Option<String>,
    details: Option<String>,
    topic: Option<String>,
}

/// Produces validated spark candidates from a completion backend.
#[derive(Clone)]
pub struct ContentGenerator {
    backend: Arc<dyn CompletionBackend>,
    retry: RetryPolicy,
    temperature: f32,
}

impl ContentGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, retry: RetryPolicy, temperature: f32) -> Self {
        Self {
            backend,
            retry,
            temperature,
        }
    }

    pub fn from_config(backend: Arc<dyn CompletionBackend>, config: &ProviderConfig) -> Self {
        Self::new(backend, RetryPolicy::from_config(config), config.temperature)
    }

    /// Generate one candidate whose topic is drawn from `topics`.
    ///
    /// Only rate limits are retried here. Unparseable output and topics
    /// outside the allowed set fail immediately; the caller decides whether
    /// to try again.
    pub async fn generate(
        &self,
        topics: &[String],
        preferences: &str,
    ) -> Result<SparkCandidate, ProviderError> {
        if topics.is_empty() {
            return Err(ProviderError::Generation(
                "topic list cannot be empty".to_string(),
            ));
        }

        let raw = self
            .retry
            .run(
                "generation",
                || {
                    let request = build_request(topics, preferences, self.temperature);
                    let backend = Arc::clone(&self.backend);
                    async move { backend.complete(&request).await }
                },
                |attempts| ProviderError::GenerationExhausted { attempts },
            )
            .await?;

        let candidate = parse_candidate(&raw, topics)?;
        info!(
            "candidate generated (topic={}, content_len={}, details_len={})",
            candidate.topic,
            candidate.content.len(),
            candidate.details.len()
        );
        Ok(candidate)
    }
}

/// Build a request with a freshly drawn form and seed.
fn build_request(topics: &[String], preferences: &str, temperature: f32) -> CompletionRequest {
    let mut rng = rand::rng();
    let form = RhetoricalForm::ALL
        .choose(&mut rng)
        .copied()
        .unwrap_or(RhetoricalForm::Insight);
    let seed = u64::from(rng.random::<u32>());
    debug!(
        "building generation request (form={form:?}, seed={seed}, topics={})",
        topics.len()
    );
    CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt: render_prompt(topics, preferences, form),
        schema: candidate_schema(topics),
        seed,
        temperature,
    }
}

fn render_prompt(topics: &[String], preferences: &str, form: RhetoricalForm) -> String {
    let mut prompt = format!(
        "Write one fact about exactly one of these topics: {}.\n",
        topics.join(", ")
    );
    let preferences = preferences.trim();
    if !preferences.is_empty() {
        prompt.push_str(&format!("Reader interests: {preferences}\n"));
    }
    prompt.push_str(form.instruction());
    prompt.push_str("\nSet `topic` to the topic you chose, spelled exactly as listed.");
    prompt
}

fn candidate_schema(topics: &[String]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": { "type": "string" },
            "details": { "type": "string" },
            "topic": { "type": "string", "enum": topics },
        },
        "required": ["content", "details", "topic"],
        "additionalProperties": false,
    })
}

/// Parse and validate provider output against the allowed topics.
pub(crate) fn parse_candidate(
    raw: &str,
    topics: &[String],
) -> Result<SparkCandidate, ProviderError> {
    let body = strip_code_fence(raw);
    let parsed: RawCandidate = serde_json::from_str(body)
        .map_err(|err| ProviderError::Generation(format!("unparseable response: {err}")))?;

    let content = required_field(parsed.content, "content")?;
    let details = required_field(parsed.details, "details")?;
    let returned = required_field(parsed.topic, "topic")?;

    let wanted = normalize_topic(&returned);
    let topic = topics
        .iter()
        .find(|allowed| normalize_topic(allowed) == wanted)
        .cloned()
        .ok_or_else(|| {
            ProviderError::Generation(format!("topic '{returned}' is not in the allowed set"))
        })?;

    Ok(SparkCandidate {
        content,
        details,
        topic,
    })
}

fn required_field(value: Option<String>, name: &str) -> Result<String, ProviderError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ProviderError::Generation(format!("response is missing `{name}`")))
}

fn normalize_topic(topic: &str) -> String {
    topic.trim().to_lowercase()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
