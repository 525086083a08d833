#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Full pipeline against an Ollama HTTP API, served by wiremock by default.
// The live test runs with: cargo test --test integration_ollama -- --ignored

use docs_rag::config::{Config, OllamaConfig};
use docs_rag::embeddings::OllamaClient;
use docs_rag::engine::RagEngine;
use docs_rag::rag::GROUNDING_DIRECTIVE;
use serde_json::{Value, json};
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const TOPICS: &[&str] = &["tide", "moon", "volcano", "lava"];

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

/// Embeds each input as topic counts, one vector per input in order
fn embed_response(request: &Request) -> ResponseTemplate {
    let body: Value = request.body_json().expect("embed request should be JSON");
    let embeddings: Vec<Vec<f32>> = body["input"]
        .as_array()
        .expect("input should be an array")
        .iter()
        .map(|input| {
            let text = input.as_str().unwrap_or_default().to_lowercase();
            TOPICS
                .iter()
                .map(|topic| text.matches(topic).count() as f32 + 0.01)
                .collect()
        })
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
}

async fn mock_ollama() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "model": "embed-test" })))
        .respond_with(embed_response)
        .mount(&server)
        .await;
    server
}

fn mock_config(server: &MockServer, base_dir: &TempDir) -> Config {
    let address = server.address();
    let mut config = Config::with_base_dir(base_dir.path());
    config.ollama = OllamaConfig {
        host: address.ip().to_string(),
        port: address.port(),
        embedding_model: "embed-test".to_string(),
        generation_model: "chat-test".to_string(),
        batch_size: 2,
        retry_attempts: 1,
        ..OllamaConfig::default()
    };
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn answer_over_http_adapters() {
    init_test_tracing();
    let server = mock_ollama().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "chat-test",
            "stream": false,
            "options": { "num_predict": 64 }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "The moon causes tides.", "done": true })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = mock_config(&server, &temp_dir);
    config.retrieval.max_new_tokens = 64;
    let engine = RagEngine::open(config).await.expect("should open engine");

    let document = temp_dir.path().join("earth.txt");
    fs::write(
        &document,
        "The tide rises and falls because the moon pulls on the oceans.\x0c\
         A volcano erupts when lava and gas escape from the mantle.\x0c\
         Lava cools into new rock.",
    )
    .expect("should write document");

    let stats = engine
        .indexer()
        .ingest_path("earth", &document)
        .await
        .expect("should ingest over HTTP");
    assert_eq!(stats.pages, 3);
    assert_eq!(stats.records_written, 3);

    let answer = engine
        .orchestrator("earth")
        .expect("should build pipeline")
        .answer_with_k("Why does the tide follow the moon?", 1)
        .await
        .expect("should answer");

    assert_eq!(answer.answer_text, "The moon causes tides.");
    assert_eq!(answer.retrieved_context.len(), 1);
    assert!(answer.retrieved_context[0].text.contains("moon pulls"));

    let prompt_sent = server
        .received_requests()
        .await
        .expect("request recording is enabled")
        .into_iter()
        .filter(|request| request.url.path() == "/api/generate")
        .map(|request| request.body_json::<Value>().expect("should be JSON"))
        .next()
        .expect("generation request was sent");
    let prompt = prompt_sent["prompt"].as_str().expect("prompt is a string");
    assert!(prompt.starts_with(GROUNDING_DIRECTIVE));
    assert!(prompt.contains("moon pulls on the oceans"));
    assert!(!prompt.contains("volcano"));
}

#[tokio::test(flavor = "multi_thread")]
async fn generation_outage_is_generation_error() {
    let server = mock_ollama().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = RagEngine::open(mock_config(&server, &temp_dir))
        .await
        .expect("should open engine");
    let document = temp_dir.path().join("lava.txt");
    fs::write(&document, "Lava is molten rock.").expect("should write document");
    engine
        .indexer()
        .ingest_path("earth", &document)
        .await
        .expect("should ingest");

    let result = engine
        .orchestrator("earth")
        .expect("should build pipeline")
        .answer("What is lava?")
        .await;

    assert!(matches!(result, Err(docs_rag::RagError::Generation(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_generation_is_not_retried() {
    let server = mock_ollama().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = mock_config(&server, &temp_dir);
    config.ollama.retry_attempts = 3;
    let engine = RagEngine::open(config).await.expect("should open engine");
    let document = temp_dir.path().join("moon.txt");
    fs::write(&document, "The moon pulls the tide.").expect("should write document");
    engine
        .indexer()
        .ingest_path("earth", &document)
        .await
        .expect("should ingest");

    let result = engine
        .orchestrator("earth")
        .expect("should build pipeline")
        .with_stage_timeout(Duration::from_millis(150))
        .answer("What pulls the tide?")
        .await;
    assert!(matches!(result, Err(docs_rag::RagError::Timeout(_))));

    tokio::time::sleep(Duration::from_secs(2)).await;
    let generate_calls = server
        .received_requests()
        .await
        .expect("request recording is enabled")
        .iter()
        .filter(|request| request.url.path() == "/api/generate")
        .count();
    assert_eq!(generate_calls, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_outage_leaves_collection_absent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = RagEngine::open(mock_config(&server, &temp_dir))
        .await
        .expect("should open engine");
    let document = temp_dir.path().join("tide.txt");
    fs::write(&document, "The tide is high.").expect("should write document");

    let result = engine.indexer().ingest_path("earth", &document).await;

    assert!(matches!(result, Err(docs_rag::RagError::Embedding(_))));
    assert!(
        engine
            .store()
            .list_collections()
            .await
            .expect("should list")
            .is_empty()
    );
}

#[test]
#[ignore = "requires a local Ollama instance with the configured models pulled"]
fn real_ollama_health_check() {
    init_test_tracing();

    let config = OllamaConfig {
        host: env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434),
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config)
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60));

    let result = client.health_check();
    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );

    let embedding = client
        .generate_embedding("The quick brown fox")
        .expect("should embed with a real model");
    assert!(!embedding.is_empty());
}
