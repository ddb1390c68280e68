
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::persistence;
use super::{DistanceMetric, DocumentMeta, DocumentSummary, IndexEntry, QueryFilter, ScoredEntry};
use crate::{Result, StudyError};

/// Immutable view of the index at one point in time
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    entries: Vec<Arc<IndexEntry>>,
    next_seq: u64,
}

impl IndexSnapshot {
    #[inline]
    pub fn entries(&self) -> &[Arc<IndexEntry>] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exact nearest-neighbour index over fixed-dimension vectors
///
/// Readers search a shared snapshot without blocking writers. Writers are
/// serialised, build the next snapshot from a copy, persist it when a storage
/// path is set, and only then publish it.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    metric: DistanceMetric,
    storage: Option<PathBuf>,
    state: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl VectorIndex {
    /// Create an empty in-memory index
    #[inline]
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            storage: None,
            state: RwLock::new(Arc::new(IndexSnapshot::default())),
            writer: Mutex::new(()),
        }
    }

    /// Open the index stored at `path`, creating an empty one if the file
    /// does not exist yet. Every later mutation is written back to `path`.
    #[inline]
    pub fn open(path: impl Into<PathBuf>, dimension: usize, metric: DistanceMetric) -> Result<Self> {
        let path = path.into();
        let mut index = if path.exists() {
            Self::load(&path, dimension, metric)?
        } else {
            info!("No index at {}, starting empty", path.display());
            Self::new(dimension, metric)
        };
        index.storage = Some(path);
        Ok(index)
    }

    /// Load a saved index; the file must match the configured dimension
    #[inline]
    pub fn load(path: &Path, dimension: usize, metric: DistanceMetric) -> Result<Self> {
        let loaded = persistence::read_index(path)?;

        if loaded.dimension != dimension {
            return Err(StudyError::DimensionMismatch {
                context: format!("index file {}", path.display()),
                expected: dimension,
                found: loaded.dimension,
            });
        }
        if loaded.metric != metric {
            warn!(
                "Index at {} was saved with metric {}, querying with {}",
                path.display(),
                loaded.metric,
                metric
            );
        }

        let index = Self::new(dimension, metric);
        *index.state.write() = Arc::new(IndexSnapshot {
            entries: loaded.entries.into_iter().map(Arc::new).collect(),
            next_seq: loaded.next_seq,
        });
        Ok(index)
    }

    /// Write the current snapshot to `path`
    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        persistence::write_index(
            path,
            self.dimension,
            self.metric,
            &snapshot.entries,
            snapshot.next_seq,
        )
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    #[inline]
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage.as_deref()
    }

    /// The currently published state
    #[inline]
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&*self.state.read())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Append entries as one unit; nothing is inserted if any vector has the
    /// wrong dimensionality or the write to disk fails
    #[inline]
    pub fn insert(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        self.check_dimensions(&entries)?;
        if entries.is_empty() {
            return Ok(0);
        }

        let count = entries.len();
        self.commit(|next| append(next, entries))?;

        debug!("Inserted {} entries", count);
        Ok(count)
    }

    /// Insert the entries of `document` unless a document with the same
    /// filename and content hash is already stored.
    ///
    /// The lookup happens under the writer lock, so of several concurrent
    /// ingests of one source exactly one is stored. Returns the document that
    /// was already present, or `None` if `entries` were inserted.
    #[inline]
    pub fn insert_document(
        &self,
        document: &DocumentMeta,
        entries: Vec<IndexEntry>,
    ) -> Result<Option<DocumentMeta>> {
        self.check_dimensions(&entries)?;

        let mut existing = None;
        self.commit_if(|next| {
            existing = next
                .entries
                .iter()
                .find(|e| {
                    e.document.filename == document.filename
                        && e.document.content_hash == document.content_hash
                })
                .map(|e| e.document.clone());
            if existing.is_some() || entries.is_empty() {
                return false;
            }
            append(next, entries);
            true
        })?;

        if let Some(stored) = &existing {
            debug!(
                "{} was stored as {} in the meantime",
                document.filename, stored.id
            );
        }
        Ok(existing)
    }

    fn check_dimensions(&self, entries: &[IndexEntry]) -> Result<()> {
        match entries.iter().find(|e| e.vector.len() != self.dimension) {
            Some(bad) => Err(StudyError::DimensionMismatch {
                context: format!(
                    "insert of chunk {} from {}",
                    bad.chunk.index, bad.document.filename
                ),
                expected: self.dimension,
                found: bad.vector.len(),
            }),
            None => Ok(()),
        }
    }

    /// Up to `k` entries most similar to `vector`, best first; equal scores
    /// keep insertion order
    #[inline]
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        if vector.len() != self.dimension {
            return Err(StudyError::DimensionMismatch {
                context: "query vector".to_string(),
                expected: self.dimension,
                found: vector.len(),
            });
        }

        let snapshot = self.snapshot();
        if k == 0 || snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = snapshot
            .entries
            .iter()
            .filter(|entry| filter.is_none_or(|f| f.matches(entry)))
            .map(|entry| ScoredEntry {
                score: self.metric.score(vector, &entry.vector),
                entry: Arc::clone(entry),
            })
            .filter(|scored| filter.is_none_or(|f| f.accepts_score(scored.score)));

        let hits: Vec<ScoredEntry> = candidates.k_smallest_by(k, rank_order).collect();

        debug!(
            "Query over {} entries returned {} hits",
            snapshot.len(),
            hits.len()
        );
        Ok(hits)
    }

    /// Remove every entry of a document, returning how many were removed
    #[inline]
    pub fn delete(&self, document_id: Uuid) -> Result<usize> {
        let mut removed = 0;
        self.commit_if(|next| {
            let before = next.entries.len();
            next.entries.retain(|e| e.document.id != document_id);
            removed = before - next.entries.len();
            removed > 0
        })?;

        if removed > 0 {
            info!("Deleted {} entries of document {}", removed, document_id);
        } else {
            debug!("No entries for document {}", document_id);
        }
        Ok(removed)
    }

    /// One summary per stored document, in first-insertion order
    #[inline]
    pub fn documents(&self) -> Vec<DocumentSummary> {
        let snapshot = self.snapshot();
        let mut summaries: Vec<DocumentSummary> = Vec::new();

        for entry in &snapshot.entries {
            match summaries
                .iter_mut()
                .find(|s| s.document.id == entry.document.id)
            {
                Some(summary) => {
                    summary.chunk_count += 1;
                    summary.total_tokens += entry.chunk.token_count;
                }
                None => summaries.push(DocumentSummary {
                    document: entry.document.clone(),
                    chunk_count: 1,
                    total_tokens: entry.chunk.token_count,
                }),
            }
        }

        summaries
    }

    /// Stored document with this filename and content hash, if any
    #[inline]
    pub fn find_document(&self, filename: &str, content_hash: &str) -> Option<DocumentMeta> {
        self.snapshot()
            .entries
            .iter()
            .find(|e| e.document.filename == filename && e.document.content_hash == content_hash)
            .map(|e| e.document.clone())
    }

    /// Entries of one document ordered by chunk index
    #[inline]
    pub fn document_entries(&self, document_id: Uuid) -> Vec<Arc<IndexEntry>> {
        let snapshot = self.snapshot();
        snapshot
            .entries
            .iter()
            .filter(|e| e.document.id == document_id)
            .cloned()
            .sorted_by_key(|e| e.chunk.index)
            .collect()
    }

    fn commit(&self, mutate: impl FnOnce(&mut IndexSnapshot)) -> Result<()> {
        self.commit_if(|next| {
            mutate(next);
            true
        })
    }

    /// Build the next snapshot under the writer lock and publish it if
    /// `mutate` reports a change and persisting succeeded
    fn commit_if(&self, mutate: impl FnOnce(&mut IndexSnapshot) -> bool) -> Result<()> {
        let _writer = self.writer.lock();

        let current = self.snapshot();
        let mut next = IndexSnapshot {
            entries: current.entries.clone(),
            next_seq: current.next_seq,
        };
        if !mutate(&mut next) {
            return Ok(());
        }

        if let Some(path) = &self.storage {
            persistence::write_index(
                path,
                self.dimension,
                self.metric,
                &next.entries,
                next.next_seq,
            )?;
        }

        *self.state.write() = Arc::new(next);
        Ok(())
    }
}

fn append(next: &mut IndexSnapshot, entries: Vec<IndexEntry>) {
    for mut entry in entries {
        entry.seq = next.next_seq;
        next.next_seq += 1;
        next.entries.push(Arc::new(entry));
    }
}

/// Best score first, then earliest insertion
fn rank_order(a: &ScoredEntry, b: &ScoredEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.entry.seq.cmp(&b.entry.seq))
}
