// Vector index module
// In-memory exact similarity search over chunk embeddings, persisted to a single file

pub mod persistence;
pub mod vector_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::embeddings::chunking::Chunk;
use crate::extract::SourceFormat;

pub use vector_store::VectorIndex;

/// Similarity measure used to rank entries; higher scores are closer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    /// Scored as the negated L2 distance
    Euclidean,
}

impl DistanceMetric {
    #[inline]
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => {
                let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
                    (0.0_f64, 0.0_f64, 0.0_f64),
                    |(dot, na, nb), (&x, &y)| {
                        let (x, y) = (f64::from(x), f64::from(y));
                        (x.mul_add(y, dot), x.mul_add(x, na), y.mul_add(y, nb))
                    },
                );
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
                }
            }
            Self::Dot => a
                .iter()
                .zip(b)
                .fold(0.0_f64, |acc, (&x, &y)| f64::from(x).mul_add(f64::from(y), acc))
                as f32,
            Self::Euclidean => {
                let squared = a.iter().zip(b).fold(0.0_f64, |acc, (&x, &y)| {
                    let d = f64::from(x) - f64::from(y);
                    d.mul_add(d, acc)
                });
                -(squared.sqrt() as f32)
            }
        }
    }
}

impl fmt::Display for DistanceMetric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Cosine => write!(f, "cosine"),
            Self::Dot => write!(f, "dot"),
            Self::Euclidean => write!(f, "euclidean"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(format!(
                "Unknown distance metric '{}' (expected cosine, dot or euclidean)",
                other
            )),
        }
    }
}

/// Document-level metadata copied onto every entry of the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: Uuid,
    pub filename: String,
    pub format: SourceFormat,
    pub ingested_at: DateTime<Utc>,
    /// Hex SHA-256 of the extracted text
    pub content_hash: String,
}

/// One embedded chunk stored in the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Insertion order, assigned by the index
    pub(crate) seq: u64,
    pub vector: Vec<f32>,
    pub chunk: Chunk,
    pub document: DocumentMeta,
    /// Page, slide or key label reported by the extractor
    pub section: Option<String>,
}

impl IndexEntry {
    #[inline]
    pub fn new(
        vector: Vec<f32>,
        chunk: Chunk,
        document: DocumentMeta,
        section: Option<String>,
    ) -> Self {
        Self {
            seq: 0,
            vector,
            chunk,
            document,
            section,
        }
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Query hit with its similarity score
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: Arc<IndexEntry>,
    pub score: f32,
}

/// Optional restrictions applied before ranking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub document_ids: Option<Vec<Uuid>>,
    pub filename: Option<String>,
    pub min_score: Option<f32>,
}

impl QueryFilter {
    #[inline]
    pub fn documents(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            document_ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[inline]
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    #[inline]
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        let id_ok = self
            .document_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&entry.document.id));
        let name_ok = self
            .filename
            .as_ref()
            .is_none_or(|name| *name == entry.document.filename);
        id_ok && name_ok
    }

    #[inline]
    pub fn accepts_score(&self, score: f32) -> bool {
        self.min_score.is_none_or(|min| score >= min)
    }
}

/// Catalog view of one stored document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub document: DocumentMeta,
    pub chunk_count: usize,
    pub total_tokens: usize,
}
