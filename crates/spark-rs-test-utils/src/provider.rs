use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use spark_rs_provider::{CompletionBackend, CompletionRequest, EmbeddingBackend, ProviderError};
use std::collections::{HashMap, VecDeque};

/// JSON body a well-behaved provider would return.
pub fn candidate_json(content: &str, details: &str, topic: &str) -> String {
    json!({ "content": content, "details": details, "topic": topic }).to_string()
}

/// One-hot vector of length `dimensions` with a 1 at `index % dimensions`.
pub fn unit_vector(dimensions: usize, index: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimensions];
    vector[index % dimensions] = 1.0;
    vector
}

/// Completion backend that replays scripted responses, then generates
/// numbered candidates on the first topic allowed by each request.
#[derive(Default)]
pub struct ScriptedCompletion {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let call = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len()
        };
        if let Some(response) = self.script.lock().pop_front() {
            return response;
        }
        let topic = request.schema["properties"]["topic"]["enum"][0]
            .as_str()
            .unwrap_or("Science")
            .to_string();
        Ok(candidate_json(
            &format!("Generated spark number {call} about {topic}."),
            &format!("Longer explanation for spark number {call}."),
            &topic,
        ))
    }
}

enum Mode {
    OneHot,
    Constant(Vec<f32>),
}

/// Embedding backend returning one-hot vectors (mutually orthogonal per
/// call) unless a call index is overridden.
pub struct ScriptedEmbedding {
    dimensions: usize,
    mode: Mode,
    overrides: Mutex<HashMap<usize, Result<Vec<f32>, ProviderError>>>,
    inputs: Mutex<Vec<String>>,
}

impl ScriptedEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            mode: Mode::OneHot,
            overrides: Mutex::new(HashMap::new()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Every call returns `vector`.
    pub fn constant(vector: Vec<f32>) -> Self {
        Self {
            dimensions: vector.len(),
            mode: Mode::Constant(vector),
            overrides: Mutex::new(HashMap::new()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Replace the response for the zero-based `call`.
    pub fn with_override(self, call: usize, response: Result<Vec<f32>, ProviderError>) -> Self {
        self.overrides.lock().insert(call, response);
        self
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().len()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl EmbeddingBackend for ScriptedEmbedding {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let call = {
            let mut inputs = self.inputs.lock();
            inputs.push(input.to_string());
            inputs.len() - 1
        };
        if let Some(response) = self.overrides.lock().remove(&call) {
            return response;
        }
        Ok(match &self.mode {
            Mode::OneHot => unit_vector(self.dimensions, call),
            Mode::Constant(vector) => vector.clone(),
        })
    }
}
