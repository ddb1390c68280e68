#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{EmbedError, Embedder};
use crate::config::OllamaConfig;

/// Dimension of `nomic-embed-text`, the default embedding model
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

/// Blocking HTTP client for an Ollama server, usable as an async [`Embedder`]
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    generation_model: String,
    batch_size: usize,
    dimension: usize,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
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
            model: config.model.clone(),
            generation_model: config.generation_model.clone(),
            batch_size: (config.batch_size as usize).max(1),
            dimension: config.embedding_dimension as usize,
            agent,
        })
    }

    /// Bound every request, including one whose caller has already given up.
    ///
    /// Requests run on tokio's blocking pool; a deadline that drops the
    /// awaiting future does not stop the HTTP call, so its thread is only
    /// released when this timeout fires. Keep it close to the deadlines
    /// callers use.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn generation_model(&self) -> &str {
        &self.generation_model
    }

    /// Verify the server is reachable and the embedding model is installed
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;

        if !models.iter().any(|m| m.name == self.model) {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
            return Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available
            ));
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// List all models installed on the server
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(classify_error)
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed one batch with a single `/api/embed` request
    #[inline]
    pub fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting embeddings for {} texts", texts.len());

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let response_text = self.post_json("/api/embed", &request)?;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            EmbedError::Permanent(format!("Failed to parse embedding response: {}", e))
        })?;

        if response.embeddings.len() != texts.len() {
            return Err(EmbedError::Permanent(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        if let Some(bad) = response
            .embeddings
            .iter()
            .find(|v| v.len() != self.dimension)
        {
            return Err(EmbedError::Dimension {
                expected: self.dimension,
                found: bad.len(),
            });
        }

        Ok(response.embeddings)
    }

    /// Run a non-streaming completion with the generation model
    #[inline]
    pub fn generate_blocking(&self, prompt: &str) -> Result<String, EmbedError> {
        let request = GenerateRequest {
            model: &self.generation_model,
            prompt,
            stream: false,
        };
        let response_text = self.post_json("/api/generate", &request)?;

        let response: GenerateResponse = serde_json::from_str(&response_text).map_err(|e| {
            EmbedError::Permanent(format!("Failed to parse generation response: {}", e))
        })?;

        Ok(response.response)
    }

    fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<String, EmbedError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| EmbedError::Permanent(format!("Failed to build URL: {}", e)))?;

        let request_json = serde_json::to_string(body)
            .map_err(|e| EmbedError::Permanent(format!("Failed to serialize request: {}", e)))?;

        self.agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(classify_error)
    }
}

/// Map transport failures onto retryable and non-retryable errors
fn classify_error(error: ureq::Error) -> EmbedError {
    match &error {
        ureq::Error::StatusCode(status) if *status >= 500 || *status == 429 => {
            EmbedError::Transient(format!("Server error: HTTP {}", status))
        }
        ureq::Error::StatusCode(status) => {
            EmbedError::Permanent(format!("Client error: HTTP {}", status))
        }
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => EmbedError::Transient(format!("Transport error: {}", error)),
        _ => EmbedError::Permanent(format!("Request error: {}", error)),
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Permanent("Empty embedding response".to_string()))
    }

    /// Runs one blocking request per batch; dropping the returned future
    /// leaves the in-flight request running until the client timeout
    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let client = self.clone();
            let batch = batch.to_vec();
            let batch_vectors = tokio::task::spawn_blocking(move || client.embed_blocking(&batch))
                .await
                .map_err(|e| EmbedError::Permanent(format!("Embedding task failed: {}", e)))??;
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }
}
