// Embeddings module
// Chunking, the embedder interface, retry policy and the Ollama client

pub mod chunking;
pub mod ollama;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;

pub use chunking::{Chunk, ChunkingConfig, count_tokens, split};
pub use ollama::OllamaClient;
pub use retry::RetryPolicy;

/// Failure reported by an [`Embedder`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbedError {
    /// Network hiccups, timeouts, server-side errors; worth retrying
    #[error("transient embedder error: {0}")]
    Transient(String),
    #[error("embedder error: {0}")]
    Permanent(String),
    #[error("embedding has {found} dimensions, expected {expected}")]
    Dimension { expected: usize, found: usize },
}

impl EmbedError {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Converts text into fixed-length vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimensionality of every vector this embedder produces
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed several texts; the output order matches the input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
