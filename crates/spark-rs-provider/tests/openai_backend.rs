use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use spark_rs_config::ProviderConfig;
use spark_rs_provider::{
    CompletionBackend, CompletionRequest, ContentGenerator, EmbeddingBackend, EmbeddingClient,
    OpenAiBackend, ProviderError, RetryPolicy,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("server");
    });
    addr
}

fn config(addr: SocketAddr, dimensions: usize) -> ProviderConfig {
    ProviderConfig {
        base_url: format!("http://{addr}/v1/"),
        embedding_dimensions: dimensions,
        ..ProviderConfig::default()
    }
}

fn request() -> CompletionRequest {
    CompletionRequest {
        system: "system".to_string(),
        prompt: "prompt".to_string(),
        schema: json!({ "type": "object" }),
        seed: 42,
        temperature: 0.5,
    }
}

async fn chat_ok(
    State(recorded): State<Recorded>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    if let Some(auth) = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
    {
        recorded.auth.lock().push(auth.to_string());
    }
    recorded.bodies.lock().push(body);
    Json(json!({
        "choices": [{
            "message": {
                "content": "{\"content\":\"c\",\"details\":\"d\",\"topic\":\"Science\"}"
            }
        }]
    }))
}

async fn embeddings_ok(
    State(recorded): State<Recorded>,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorded.bodies.lock().push(body);
    Json(json!({ "data": [{ "embedding": [0.5, 0.25, 0.125] }] }))
}

async fn rate_limited() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("retry-after", "7")],
        Json(json!({ "error": { "message": "slow down" } })),
    )
        .into_response()
}

async fn server_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Json(json!({}))
}

#[tokio::test]
async fn chat_completion_sends_schema_and_seed() {
    let recorded = Recorded::default();
    let router = Router::new()
        .route("/v1/chat/completions", post(chat_ok))
        .with_state(recorded.clone());
    let addr = spawn(router).await;

    let backend = OpenAiBackend::new(&config(addr, 3), Some("sk-test".to_string()))
        .expect("backend");
    let content = backend.complete(&request()).await.expect("complete");
    assert!(content.contains("Science"));

    let bodies = recorded.bodies.lock();
    let body = &bodies[0];
    assert_eq!(body["seed"], json!(42));
    assert_eq!(body["response_format"]["type"], json!("json_schema"));
    assert_eq!(body["response_format"]["json_schema"]["strict"], json!(true));
    assert_eq!(body["messages"][1]["content"], json!("prompt"));
    assert_eq!(recorded.auth.lock().clone(), vec!["Bearer sk-test".to_string()]);
}

#[tokio::test]
async fn generator_runs_against_http_backend() {
    let recorded = Recorded::default();
    let router = Router::new()
        .route("/v1/chat/completions", post(chat_ok))
        .with_state(recorded.clone());
    let addr = spawn(router).await;

    let backend = Arc::new(OpenAiBackend::new(&config(addr, 3), None).expect("backend"));
    let generator = ContentGenerator::from_config(backend, &config(addr, 3));
    let topics = vec!["Science".to_string(), "Art".to_string()];
    let candidate = generator.generate(&topics, "").await.expect("generate");
    assert_eq!(candidate.topic, "Science");
    assert!(recorded.auth.lock().is_empty());
}

#[tokio::test]
async fn embeddings_request_dimensions() {
    let recorded = Recorded::default();
    let router = Router::new()
        .route("/v1/embeddings", post(embeddings_ok))
        .with_state(recorded.clone());
    let addr = spawn(router).await;

    let backend = Arc::new(OpenAiBackend::new(&config(addr, 3), None).expect("backend"));
    let vector = backend.embed("text").await.expect("embed");
    assert_eq!(vector, vec![0.5, 0.25, 0.125]);
    assert_eq!(recorded.bodies.lock()[0]["dimensions"], json!(3));

    let client = EmbeddingClient::from_config(backend, &config(addr, 4));
    let err = client.embed("a", "b").await.expect_err("dimension mismatch");
    assert!(matches!(err, ProviderError::Embedding(_)));
}

#[tokio::test]
async fn too_many_requests_maps_to_rate_limit_hint() {
    let router = Router::new().route("/v1/chat/completions", post(rate_limited));
    let addr = spawn(router).await;

    let backend = OpenAiBackend::new(&config(addr, 3), None).expect("backend");
    let err = backend.complete(&request()).await.expect_err("rate limited");
    match err {
        ProviderError::RateLimited { retry_after } => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)))
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn generator_exhausts_after_repeated_rate_limits() {
    let router = Router::new().route("/v1/chat/completions", post(rate_limited));
    let addr = spawn(router).await;

    let backend = Arc::new(OpenAiBackend::new(&config(addr, 3), None).expect("backend"));
    let retry = RetryPolicy {
        max_attempts: 2,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    };
    let generator = ContentGenerator::new(backend, retry, 0.7);
    let err = generator
        .generate(&["Science".to_string()], "")
        .await
        .expect_err("exhausted");
    assert!(matches!(
        err,
        ProviderError::GenerationExhausted { attempts: 2 }
    ));
}

#[tokio::test]
async fn server_errors_map_by_endpoint() {
    let router = Router::new()
        .route("/v1/chat/completions", post(server_error))
        .route("/v1/embeddings", post(server_error));
    let addr = spawn(router).await;

    let backend = OpenAiBackend::new(&config(addr, 3), None).expect("backend");
    let err = backend.complete(&request()).await.expect_err("chat");
    assert!(matches!(err, ProviderError::Generation(message) if message.contains("500")));
    let err = backend.embed("x").await.expect_err("embed");
    assert!(matches!(err, ProviderError::Embedding(message) if message.contains("500")));
}

#[tokio::test]
async fn slow_responses_time_out() {
    let router = Router::new().route("/v1/chat/completions", post(slow));
    let addr = spawn(router).await;

    let backend =
        OpenAiBackend::with_timeout(&config(addr, 3), None, Duration::from_millis(100))
            .expect("backend");
    let err = backend.complete(&request()).await.expect_err("timeout");
    assert!(matches!(err, ProviderError::Timeout(_)));
    assert!(err.is_transient());
}

#[test]
fn from_env_requires_the_key_variable() {
    let config = ProviderConfig {
        api_key_env: "SPARK_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
        ..ProviderConfig::default()
    };
    let err = OpenAiBackend::from_env(&config).expect_err("missing key");
    assert!(matches!(err, ProviderError::Config(_)));
}
