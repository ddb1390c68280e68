// Context assembly module
// Packs retrieved passages into a token-bounded block with numbered citations


use serde::Serialize;
use std::fmt::Write;
use tracing::debug;
use uuid::Uuid;

use crate::embeddings::count_tokens;
use crate::retriever::{RetrievalResult, RetrievedPassage};

/// Characters of passage text shown per source
const PREVIEW_CHARS: usize = 200;
const PASSAGE_SEPARATOR: &str = "\n\n";

/// Where a numbered passage of the context block came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    /// 1-based, in inclusion order
    pub marker: usize,
    pub document_id: Uuid,
    pub filename: String,
    pub section: Option<String>,
    pub start: usize,
    pub end: usize,
    pub chunk_indices: Vec<usize>,
    pub preview: String,
}

impl Citation {
    #[inline]
    pub fn label(&self) -> String {
        format!("[{}]", self.marker)
    }

    /// Filename plus section, e.g. `lecture.pdf (page 3)`
    #[inline]
    pub fn source(&self) -> String {
        match &self.section {
            Some(section) => format!("{} ({})", self.filename, section),
            None => self.filename.clone(),
        }
    }
}

/// Context block handed to answer generation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AssembledContext {
    pub text: String,
    pub citations: Vec<Citation>,
    /// Tokens of `text`, citation headers included
    pub token_count: usize,
    /// Passages left out because the budget ran out
    pub omitted: usize,
}

impl AssembledContext {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    /// Numbered source listing for display under an answer
    #[inline]
    pub fn render_sources(&self) -> String {
        let mut out = String::from("SOURCES:\n");
        for citation in &self.citations {
            let _ = writeln!(out, "{} From {}:", citation.label(), citation.source());
            let _ = writeln!(out, "   {}", citation.preview);
            out.push('\n');
        }
        out
    }
}

/// Order passages by score, drop repeats, and fill the token budget greedily.
///
/// Each passage is charged for its rendered segment, citation header
/// included, so `count_tokens(&context.text)` never exceeds
/// `max_context_tokens`. Inclusion stops at the first passage that would
/// overflow the budget; passages are never cut mid-text.
#[inline]
pub fn assemble(result: &RetrievalResult, max_context_tokens: usize) -> AssembledContext {
    let mut ordered: Vec<&RetrievedPassage> = result.passages.iter().collect();
    ordered.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.rank.cmp(&b.rank)));

    let mut context = AssembledContext::default();
    let mut included: Vec<&RetrievedPassage> = Vec::new();

    for (position, &passage) in ordered.iter().enumerate() {
        if included.iter().any(|seen| is_within(passage, seen)) {
            debug!(
                "Skipping passage {}..{} of {}, already included",
                passage.start, passage.end, passage.filename
            );
            continue;
        }

        let marker = context.citations.len() + 1;
        let segment = format!(
            "[{}] {}:\n{}",
            marker,
            source_label(passage),
            passage.text.trim()
        );
        let cost = count_tokens(&segment);

        if context.token_count + cost > max_context_tokens {
            context.omitted = ordered
                .iter()
                .skip(position)
                .filter(|p| !included.iter().any(|seen| is_within(p, seen)))
                .count();
            debug!(
                "Context budget of {} tokens reached, omitting {} passages",
                max_context_tokens, context.omitted
            );
            break;
        }

        if !context.text.is_empty() {
            context.text.push_str(PASSAGE_SEPARATOR);
        }
        context.text.push_str(&segment);
        context.token_count += cost;
        context.citations.push(Citation {
            marker,
            document_id: passage.document_id,
            filename: passage.filename.clone(),
            section: passage.section.clone(),
            start: passage.start,
            end: passage.end,
            chunk_indices: passage.chunk_indices.clone(),
            preview: preview(&passage.text),
        });
        included.push(passage);
    }

    context
}

/// Same document and a span inside `other`
fn is_within(passage: &RetrievedPassage, other: &RetrievedPassage) -> bool {
    passage.document_id == other.document_id
        && other.start <= passage.start
        && passage.end <= other.end
}

fn source_label(passage: &RetrievedPassage) -> String {
    match &passage.section {
        Some(section) => format!("{} ({})", passage.filename, section),
        None => passage.filename.clone(),
    }
}

/// First characters of `text` on one line, with an ellipsis when cut
fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", flat.get(..cut).unwrap_or_default()),
        None => flat,
    }
}
