#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::ConfigError;

/// Characters that may trail a sentence terminator, e.g. `said "stop."`
const CLOSING_PUNCTUATION: &[char] = &['"', '\'', ')', ']', '}', '\u{201D}', '\u{2019}'];

/// A bounded span of a document, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Document this chunk was cut from
    pub document_id: Uuid,
    /// Position of this chunk within the document
    pub index: usize,
    /// The exact text span `[start, end)` of the source document
    pub text: String,
    /// Byte offset of the first byte of `text` in the source document
    pub start: usize,
    /// Byte offset one past the last byte of `text`
    pub end: usize,
    /// Leading bytes of `text` repeated from the previous chunk
    pub overlap_len: usize,
    /// Number of tokens in `text`
    pub token_count: usize,
}

impl Chunk {
    #[inline]
    pub fn has_overlap(&self) -> bool {
        self.overlap_len > 0
    }

    /// The part of this chunk not shared with its predecessor
    #[inline]
    pub fn fresh_text(&self) -> &str {
        self.text.get(self.overlap_len..).unwrap_or_default()
    }

    /// Byte offset where the fresh part of this chunk begins
    #[inline]
    pub fn fresh_start(&self) -> usize {
        self.start + self.overlap_len
    }
}

/// Configuration for splitting documents into chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in tokens
    pub max_tokens: usize,
    /// Tokens from the end of one chunk repeated at the start of the next
    pub overlap_tokens: usize,
    /// Prefer ending chunks at sentence boundaries
    pub sentence_boundary_splitting: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_tokens: 256,
            overlap_tokens: 32,
            sentence_boundary_splitting: true,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
            ..Self::default()
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ConfigError::OverlapTooLarge(
                self.overlap_tokens,
                self.max_tokens,
            ));
        }
        Ok(())
    }
}

/// A whitespace-delimited word together with the whitespace that follows it
#[derive(Debug, Clone, Copy)]
struct TokenSpan {
    start: usize,
    end: usize,
    sentence_end: bool,
}

/// Count tokens using the same scheme the chunker splits on
#[inline]
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split `text` into ordered, possibly overlapping chunks.
///
/// Token spans tile the text exactly, so concatenating every chunk's
/// [`Chunk::fresh_text`] reproduces `text` byte for byte.
#[inline]
pub fn split(
    document_id: Uuid,
    text: &str,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, ConfigError> {
    config.validate()?;

    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let total = tokens.len();
    let mut chunks = Vec::new();
    let mut start_tok = 0;
    let mut prev_end_tok = 0;

    loop {
        let window_end = (start_tok + config.max_tokens).min(total);
        let mut end_tok = window_end;

        if window_end < total && config.sentence_boundary_splitting {
            for t in (start_tok..window_end).rev() {
                let candidate = t + 1;
                // the chunk must stay longer than the overlap or we would stall
                if candidate - start_tok <= config.overlap_tokens {
                    break;
                }
                if tokens[t].sentence_end {
                    end_tok = candidate;
                    break;
                }
            }
        }

        let start = tokens[start_tok].start;
        let end = tokens[end_tok - 1].end;
        let overlap_len = if chunks.is_empty() {
            0
        } else {
            tokens[prev_end_tok].start - start
        };

        chunks.push(Chunk {
            document_id,
            index: chunks.len(),
            text: text.get(start..end).unwrap_or_default().to_string(),
            start,
            end,
            overlap_len,
            token_count: end_tok - start_tok,
        });

        if end_tok >= total {
            break;
        }

        prev_end_tok = end_tok;
        start_tok = end_tok - config.overlap_tokens;
    }

    debug!(
        "Split document {} ({} tokens) into {} chunks",
        document_id,
        total,
        chunks.len()
    );

    Ok(chunks)
}

fn tokenize(text: &str) -> Vec<TokenSpan> {
    let mut word_starts = Vec::new();
    let mut in_word = false;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            word_starts.push(i);
            in_word = true;
        }
    }

    word_starts
        .iter()
        .enumerate()
        .map(|(k, &word_start)| {
            let start = if k == 0 { 0 } else { word_start };
            let end = word_starts.get(k + 1).copied().unwrap_or(text.len());
            let word = text.get(word_start..end).unwrap_or_default().trim_end();
            TokenSpan {
                start,
                end,
                sentence_end: is_sentence_end(word),
            }
        })
        .collect()
}

fn is_sentence_end(word: &str) -> bool {
    word.trim_end_matches(CLOSING_PUNCTUATION)
        .ends_with(['.', '!', '?'])
}
