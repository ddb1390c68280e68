// Retriever module
// Drives chunking, embedding and indexing on ingest, and top-k lookup on query


use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use itertools::Itertools;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embeddings::chunking::{self, Chunk, ChunkingConfig};
use crate::embeddings::{EmbedError, Embedder, RetryPolicy};
use crate::extract::ExtractedText;
use crate::index::{
    DocumentMeta, DocumentSummary, IndexEntry, QueryFilter, ScoredEntry, VectorIndex,
};
use crate::{Result, StudyError};

/// Default number of chunk texts sent per embedder call
const DEFAULT_BATCH_SIZE: usize = 16;
/// Default embedder calls in flight per ingestion
const DEFAULT_CONCURRENCY: usize = 4;

/// A stored document and the chunks it was split into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub meta: DocumentMeta,
    pub chunks: Vec<Chunk>,
}

impl Document {
    #[inline]
    pub fn id(&self) -> Uuid {
        self.meta.id
    }
}

/// One ranked piece of retrieved text with everything needed to cite it
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub document_id: Uuid,
    pub filename: String,
    pub section: Option<String>,
    /// Chunks covered by this passage, ascending; more than one when merged
    pub chunk_indices: Vec<usize>,
    /// Byte range `[start, end)` in the source document
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub score: f32,
    /// 1-based position in the result
    pub rank: usize,
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetrievalResult {
    pub query: String,
    pub passages: Vec<RetrievedPassage>,
}

impl RetrievalResult {
    #[inline]
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            passages: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Ingestion and query pipeline over a shared [`VectorIndex`]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    retry: RetryPolicy,
    concurrency: usize,
    batch_size: usize,
    merge_adjacent: bool,
}

impl Retriever {
    /// Fails if the embedder and index disagree on dimensionality
    #[inline]
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(StudyError::DimensionMismatch {
                context: "embedder versus index".to_string(),
                expected: index.dimension(),
                found: embedder.dimension(),
            });
        }

        Ok(Self {
            index,
            embedder,
            chunking: ChunkingConfig::default(),
            retry: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            merge_adjacent: true,
        })
    }

    #[inline]
    pub fn from_config(
        config: &Config,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.chunking.validate()?;
        Ok(Self::new(index, embedder)?
            .with_chunking(config.chunking.clone())
            .with_retry(config.retry.policy())
            .with_concurrency(config.retrieval.embed_concurrency)
            .with_batch_size(config.ollama.batch_size as usize)
            .with_merge_adjacent(config.retrieval.merge_adjacent))
    }

    #[inline]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[inline]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn with_merge_adjacent(mut self, merge_adjacent: bool) -> Self {
        self.merge_adjacent = merge_adjacent;
        self
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Chunk, embed and store a document as one unit.
    ///
    /// Re-ingesting the same filename with identical text returns the stored
    /// document without embedding anything. If any chunk fails to embed,
    /// nothing is inserted.
    #[inline]
    pub async fn ingest(&self, source: &ExtractedText) -> Result<Document> {
        let content_hash = hex::encode(Sha256::digest(source.text.as_bytes()));

        if let Some(meta) = self.index.find_document(&source.filename, &content_hash) {
            info!(
                "{} is already indexed as {}, skipping",
                source.filename, meta.id
            );
            return Ok(self.stored_document(meta));
        }

        let meta = DocumentMeta {
            id: Uuid::new_v4(),
            filename: source.filename.clone(),
            format: source.format,
            ingested_at: Utc::now(),
            content_hash,
        };

        let chunks = chunking::split(meta.id, &source.text, &self.chunking)?;
        if chunks.is_empty() {
            warn!("{} has no text to index", meta.filename);
            return Ok(Document {
                meta,
                chunks: Vec::new(),
            });
        }

        debug!(
            "Embedding {} chunks of {} with up to {} requests in flight",
            chunks.len(),
            meta.filename,
            self.concurrency
        );
        let vectors = self.embed_chunks(&meta, &chunks).await?;

        let entries = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let section = source.label_for(chunk.start, chunk.end);
                IndexEntry::new(vector, chunk.clone(), meta.clone(), section)
            })
            .collect();

        // single synchronous commit; dropping this future earlier leaves no trace
        if let Some(stored) = self.index.insert_document(&meta, entries)? {
            info!(
                "{} was indexed concurrently as {}, discarding {}",
                meta.filename, stored.id, meta.id
            );
            return Ok(self.stored_document(stored));
        }

        info!(
            "Ingested {} as {} ({} chunks)",
            meta.filename,
            meta.id,
            chunks.len()
        );
        Ok(Document { meta, chunks })
    }

    fn stored_document(&self, meta: DocumentMeta) -> Document {
        let chunks = self
            .index
            .document_entries(meta.id)
            .iter()
            .map(|entry| entry.chunk.clone())
            .collect();
        Document { meta, chunks }
    }

    /// Embed all chunks in batches, preserving chunk order
    async fn embed_chunks(&self, meta: &DocumentMeta, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        // owned batches keep the stream free of borrows into `chunks`
        let batches: Vec<(String, Vec<String>)> = chunks
            .chunks(self.batch_size)
            .map(|batch| {
                let first = batch.first().map_or(0, |c| c.index);
                let last = batch.last().map_or(0, |c| c.index);
                let context = format!(
                    "ingest of {} ({}) chunks {}..={}",
                    meta.filename, meta.id, first, last
                );
                (context, batch.iter().map(|c| c.text.clone()).collect())
            })
            .collect();

        let embedder = Arc::clone(&self.embedder);
        let retry = self.retry.clone();
        let embedded: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(move |(context, texts)| {
                let embedder = Arc::clone(&embedder);
                let retry = retry.clone();
                async move {
                    retry
                        .run(&context, || embedder.embed_batch(&texts))
                        .await
                        .map_err(|e| embed_failure(context, e))
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let vectors: Vec<Vec<f32>> = embedded.into_iter().flatten().collect();
        if vectors.len() != chunks.len() {
            return Err(StudyError::Embedding {
                context: format!("ingest of {} ({})", meta.filename, meta.id),
                message: format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            });
        }
        Ok(vectors)
    }

    /// Top-`k` passages for `query`
    #[inline]
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        self.retrieve_filtered(query, k, None).await
    }

    #[inline]
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<RetrievalResult> {
        if query.trim().is_empty() || k == 0 {
            return Ok(RetrievalResult::empty(query));
        }

        let embedder = &self.embedder;
        let vector = self
            .retry
            .run("query embedding", || embedder.embed(query))
            .await
            .map_err(|e| embed_failure("query embedding".to_string(), e))?;

        let hits = self.index.query(&vector, k, filter)?;
        let passages = if self.merge_adjacent {
            merge_adjacent(&hits)
        } else {
            hits.iter()
                .enumerate()
                .filter_map(|(i, hit)| passage_from_run(&[hit], i + 1))
                .collect()
        };

        debug!("Retrieved {} passages for query", passages.len());
        Ok(RetrievalResult {
            query: query.to_string(),
            passages,
        })
    }

    /// [`Retriever::ingest`] bounded by `deadline`; on expiry nothing is stored.
    ///
    /// An embedder request already in flight is not interrupted. With
    /// [`OllamaClient`](crate::embeddings::OllamaClient) it holds a blocking
    /// thread until the client timeout, see
    /// [`OllamaClient::with_timeout`](crate::embeddings::OllamaClient::with_timeout).
    #[inline]
    pub async fn ingest_with_deadline(
        &self,
        source: &ExtractedText,
        deadline: Duration,
    ) -> Result<Document> {
        tokio::time::timeout(deadline, self.ingest(source))
            .await
            .map_err(|_| {
                warn!("Ingest of {} cancelled after {:?}", source.filename, deadline);
                StudyError::Timeout(format!(
                    "ingest of {} exceeded {:?}",
                    source.filename, deadline
                ))
            })?
    }

    #[inline]
    pub async fn retrieve_with_deadline(
        &self,
        query: &str,
        k: usize,
        deadline: Duration,
    ) -> Result<RetrievalResult> {
        tokio::time::timeout(deadline, self.retrieve(query, k))
            .await
            .map_err(|_| StudyError::Timeout(format!("retrieval exceeded {:?}", deadline)))?
    }

    #[inline]
    pub fn delete(&self, document_id: Uuid) -> Result<usize> {
        self.index.delete(document_id)
    }

    #[inline]
    pub fn documents(&self) -> Vec<DocumentSummary> {
        self.index.documents()
    }
}

fn embed_failure(context: String, error: EmbedError) -> StudyError {
    match error {
        EmbedError::Dimension { expected, found } => StudyError::DimensionMismatch {
            context,
            expected,
            found,
        },
        other => StudyError::Embedding {
            context,
            message: other.to_string(),
        },
    }
}

/// Merge hits that are consecutive chunks of one document, as long as each
/// later chunk overlaps its predecessor; ranks follow the best member's score
fn merge_adjacent(hits: &[ScoredEntry]) -> Vec<RetrievedPassage> {
    let mut runs: Vec<(usize, Vec<&ScoredEntry>)> = Vec::new();

    let by_position = hits
        .iter()
        .enumerate()
        .sorted_by_key(|(_, hit)| (hit.entry.document.id, hit.entry.chunk.index));

    for (position, hit) in by_position {
        let extends_run = runs.last().and_then(|(_, run)| run.last()).is_some_and(|prev| {
            prev.entry.document.id == hit.entry.document.id
                && prev.entry.chunk.index + 1 == hit.entry.chunk.index
                && hit.entry.chunk.has_overlap()
        });

        match runs.last_mut() {
            Some((best, run)) if extends_run => {
                *best = (*best).min(position);
                run.push(hit);
            }
            _ => runs.push((position, vec![hit])),
        }
    }

    runs.sort_by_key(|(best, _)| *best);
    runs.iter()
        .enumerate()
        .filter_map(|(i, (_, run))| passage_from_run(run, i + 1))
        .collect()
}

/// Build a passage from consecutive chunks of one document
fn passage_from_run(run: &[&ScoredEntry], rank: usize) -> Option<RetrievedPassage> {
    let first = &run.first()?.entry;
    let last = &run.last()?.entry;

    let mut text = String::new();
    let mut chunk_indices = Vec::with_capacity(run.len());
    let mut score = f32::NEG_INFINITY;

    for (i, hit) in run.iter().enumerate() {
        let chunk = &hit.entry.chunk;
        text.push_str(if i == 0 {
            chunk.text.as_str()
        } else {
            chunk.fresh_text()
        });
        chunk_indices.push(chunk.index);
        score = score.max(hit.score);
    }

    let section = match (&first.section, &last.section) {
        (Some(a), Some(b)) if run.len() > 1 && a != b => Some(format!("{} - {}", a, b)),
        (a, _) => a.clone(),
    };

    Some(RetrievedPassage {
        document_id: first.document.id,
        filename: first.document.filename.clone(),
        section,
        chunk_indices,
        start: first.chunk.start,
        end: last.chunk.end,
        token_count: chunking::count_tokens(&text),
        text,
        score,
        rank,
    })
}
