
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::RagError;
use crate::config::OllamaConfig;
use crate::rag::{Embed, Generate};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const BACKOFF_UNIT_MS: u64 = 500;
const ABANDON_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Blocking client for a local Ollama server
///
/// Serves as both the embedding and the generation adapter. The async trait
/// impls move each call onto the blocking thread pool. When the awaiting
/// future is dropped, for example by a deadline, the blocking call makes no
/// further attempts and stops waiting on backoff.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    generation_model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
    abandoned: Arc<AtomicBool>,
}

/// Marks the blocking call it was created with as abandoned when dropped
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    #[inline]
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            batch_size: config.batch_size.max(1),
            agent,
            retry_attempts: config.retry_attempts.max(1),
            abandoned: Arc::new(AtomicBool::new(false)),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Test connection to Ollama server and verify both models are available
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_models().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} (embedding {}, generation {})",
            self.base_url, self.embedding_model, self.generation_model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        debug!("Server ping successful");
        Ok(())
    }

    /// Validate that the configured embedding and generation models are pulled
    #[inline]
    pub fn validate_models(&self) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;
        let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();

        for model in [&self.embedding_model, &self.generation_model] {
            debug!("Validating model: {}", model);
            if !available.contains(&model.as_str()) {
                warn!(
                    "Model {} not found. Available models: {:?}",
                    model, available
                );
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    model,
                    available
                ));
            }
        }

        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate the embedding of a single text
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        self.request_embeddings(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no embedding"))
    }

    /// Generate embeddings for several texts, `batch_size` per request, in input order
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let batch_embeddings = self
                .request_embeddings(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            embeddings.extend(batch_embeddings);
        }

        debug!("Generated {} embeddings total", embeddings.len());
        Ok(embeddings)
    }

    fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            inputs: texts,
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }
        if response.embeddings.iter().any(Vec::is_empty) {
            return Err(anyhow::anyhow!("Ollama returned an empty embedding"));
        }

        Ok(response.embeddings)
    }

    /// Run the generation model on a prompt, producing at most `max_new_tokens` tokens
    #[inline]
    pub fn generate_completion(&self, prompt: &str, max_new_tokens: u32) -> Result<String> {
        debug!(
            "Generating completion with {} (prompt length: {}, max tokens: {})",
            self.generation_model,
            prompt.len(),
            max_new_tokens
        );

        let request = GenerateRequest {
            model: &self.generation_model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: max_new_tokens,
            },
        };

        let url = self
            .base_url
            .join("/api/generate")
            .context("Failed to build generation URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize generation request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate completion")?;

        let response: GenerateResponse = serde_json::from_str(&response_text)
            .context("Failed to parse generation response")?;

        debug!("Generated {} chars", response.response.len());
        Ok(response.response)
    }

    /// A copy of the client for one blocking call, with its own abandon flag
    fn detached(&self) -> (Self, AbandonOnDrop) {
        let flag = Arc::new(AtomicBool::new(false));
        let client = Self {
            abandoned: Arc::clone(&flag),
            ..self.clone()
        };
        (client, AbandonOnDrop(flag))
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, returning early once the call is abandoned
    fn wait_before_retry(&self, delay: Duration) {
        let until = Instant::now() + delay;
        while !self.is_abandoned() {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(ABANDON_POLL_INTERVAL));
        }
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            if self.is_abandoned() {
                debug!("Caller gave up, skipping attempt {}", attempt);
                return Err(last_error
                    .unwrap_or_else(|| anyhow::anyhow!("Request abandoned by caller")));
            }
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                        }
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = Duration::from_millis(
                            EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * BACKOFF_UNIT_MS,
                        );
                        debug!("Waiting {:?} before retry", delay);
                        self.wait_before_retry(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

#[async_trait]
impl Embed for OllamaClient {
    #[inline]
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        let (client, _abandon) = self.detached();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || client.generate_embedding(&text))
            .await
            .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))?
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))
    }

    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let (client, _abandon) = self.detached();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.generate_embeddings_batch(&texts))
            .await
            .map_err(|e| RagError::Embedding(format!("Embedding task failed: {}", e)))?
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))
    }
}

#[async_trait]
impl Generate for OllamaClient {
    #[inline]
    async fn generate(&self, prompt: &str, max_new_tokens: u32) -> crate::Result<String> {
        let (client, _abandon) = self.detached();
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || client.generate_completion(&prompt, max_new_tokens))
            .await
            .map_err(|e| RagError::Generation(format!("Generation task failed: {}", e)))?
            .map_err(|e| RagError::Generation(format!("{:#}", e)))
    }
}
