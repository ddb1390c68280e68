use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StudyError>;

#[derive(Error, Debug)]
pub enum StudyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Vector dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Embedding failed during {context}: {message}")]
    Embedding { context: String, message: String },

    #[error("Index corruption in {}: {reason}", path.display())]
    IndexCorruption { path: PathBuf, reason: String },

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl StudyError {
    /// Fatal errors are never retried and should stop the caller.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::DimensionMismatch { .. } | Self::IndexCorruption { .. }
        )
    }
}

impl From<config::ConfigError> for StudyError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub mod commands;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod extract;
pub mod generation;
pub mod index;
pub mod retriever;
