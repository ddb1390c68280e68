// Text extraction module
// Turns study material on disk into plain text with section markers


use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{Result, StudyError};

/// Separator inserted between independently extracted text segments
const SEGMENT_SEPARATOR: &str = "\n\n";
/// Page / slide separator in pre-extracted text (as written by `pdftotext`)
const PAGE_BREAK: char = '\u{000C}';
/// Suffix of companion files holding pre-extracted text
const COMPANION_SUFFIX: &str = "txt";

/// Closed set of supported source formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    PlainText,
    PdfExtracted,
    SlideExtracted,
    JsonExtracted,
}

impl SourceFormat {
    /// Detect the format from a file extension, case-insensitively
    #[inline]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "txt" | "md" => Some(Self::PlainText),
            "pdf" => Some(Self::PdfExtracted),
            "ppt" | "pptx" => Some(Self::SlideExtracted),
            "json" => Some(Self::JsonExtracted),
            _ => None,
        }
    }

    /// Label prefix for the sections of this format
    fn section_noun(self) -> &'static str {
        match self {
            Self::PdfExtracted => "page",
            Self::SlideExtracted => "slide",
            Self::JsonExtracted => "item",
            Self::PlainText => "section",
        }
    }
}

impl fmt::Display for SourceFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PlainText => write!(f, "text"),
            Self::PdfExtracted => write!(f, "pdf"),
            Self::SlideExtracted => write!(f, "slides"),
            Self::JsonExtracted => write!(f, "json"),
        }
    }
}

/// A labelled byte range of extracted text, e.g. a page or a JSON key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub label: String,
    pub start: usize,
    pub end: usize,
}

/// Plain text of one source document plus its structure map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub filename: String,
    pub format: SourceFormat,
    pub text: String,
    pub sections: Vec<Section>,
}

impl ExtractedText {
    #[inline]
    pub fn plain(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            format: SourceFormat::PlainText,
            text: text.into(),
            sections: Vec::new(),
        }
    }

    /// Join labelled segments with a blank line, recording each one's range
    #[inline]
    pub fn from_segments<I, L, T>(filename: impl Into<String>, format: SourceFormat, segments: I) -> Self
    where
        I: IntoIterator<Item = (L, T)>,
        L: Into<String>,
        T: AsRef<str>,
    {
        let mut text = String::new();
        let mut sections = Vec::new();

        for (label, segment) in segments {
            if !text.is_empty() {
                text.push_str(SEGMENT_SEPARATOR);
            }
            let start = text.len();
            text.push_str(segment.as_ref());
            sections.push(Section {
                label: label.into(),
                start,
                end: text.len(),
            });
        }

        Self {
            filename: filename.into(),
            format,
            text,
            sections,
        }
    }

    /// Split pre-extracted text on form feeds, one section per page or slide
    #[inline]
    pub fn from_paged(filename: impl Into<String>, format: SourceFormat, text: String) -> Self {
        let noun = format.section_noun();
        let mut sections = Vec::new();
        let mut start = 0;

        for (number, page) in text.split(PAGE_BREAK).enumerate() {
            let end = start + page.len();
            if !page.trim().is_empty() {
                sections.push(Section {
                    label: format!("{} {}", noun, number + 1),
                    start,
                    end,
                });
            }
            start = end + PAGE_BREAK.len_utf8();
        }

        Self {
            filename: filename.into(),
            format,
            text,
            sections,
        }
    }

    /// Label for the byte range `[start, end)`, spanning sections if needed
    #[inline]
    pub fn label_for(&self, start: usize, end: usize) -> Option<String> {
        let mut touched = self
            .sections
            .iter()
            .filter(|s| s.start < end && start < s.end);
        let first = touched.next()?;
        match touched.last() {
            Some(last) => Some(format!("{} - {}", first.label, last.label)),
            None => Some(first.label.clone()),
        }
    }
}

/// Produces plain text from a source file
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedText>;
}

/// Reads text and JSON natively; PDF and slide decks need a pre-extracted
/// companion file named `<file>.txt` (e.g. `lecture.pdf.txt`)
#[derive(Debug, Clone, Copy, Default)]
pub struct FileExtractor;

impl FileExtractor {
    /// Path of the pre-extracted text for a binary source
    #[inline]
    pub fn companion_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".");
        name.push(COMPANION_SUFFIX);
        PathBuf::from(name)
    }

    /// Whether `path` is the companion of a binary source that sits next to it
    #[inline]
    pub fn is_companion(path: &Path) -> bool {
        let Some(stem) = path.file_stem() else {
            return false;
        };
        let stem = Path::new(stem);
        let binary_source = matches!(
            SourceFormat::from_path(stem),
            Some(SourceFormat::PdfExtracted | SourceFormat::SlideExtracted)
        );
        binary_source && path.with_file_name(stem).exists()
    }

    fn read_json(filename: String, content: &str) -> Result<ExtractedText> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| StudyError::Extraction(format!("Invalid JSON in {}: {}", filename, e)))?;

        let segments: Vec<(String, String)> = match value {
            serde_json::Value::Object(map) => map
                .into_iter()
                .filter_map(|(key, value)| match value {
                    serde_json::Value::String(text) => Some((key, text)),
                    _ => None,
                })
                .collect(),
            serde_json::Value::Array(items) => items
                .into_iter()
                .enumerate()
                .filter_map(|(i, value)| match value {
                    serde_json::Value::String(text) => Some((format!("item {}", i + 1), text)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        if segments.is_empty() {
            warn!("No string values found in {}", filename);
        }

        Ok(ExtractedText::from_segments(
            filename,
            SourceFormat::JsonExtracted,
            segments,
        ))
    }
}

impl TextExtractor for FileExtractor {
    #[inline]
    fn extract(&self, path: &Path) -> Result<ExtractedText> {
        let format = SourceFormat::from_path(path).ok_or_else(|| {
            StudyError::Extraction(format!(
                "Unsupported file type: {}. Supported types: .txt, .md, .json, .pdf, .ppt, .pptx",
                path.display()
            ))
        })?;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        debug!("Extracting {} as {}", path.display(), format);

        match format {
            SourceFormat::PlainText => {
                let text = fs::read_to_string(path)?;
                Ok(ExtractedText::plain(filename, text))
            }
            SourceFormat::JsonExtracted => {
                let content = fs::read_to_string(path)?;
                Self::read_json(filename, &content)
            }
            SourceFormat::PdfExtracted | SourceFormat::SlideExtracted => {
                let companion = Self::companion_path(path);
                if !companion.exists() {
                    return Err(StudyError::Extraction(format!(
                        "No pre-extracted text for {}; save the extracted text as {}",
                        path.display(),
                        companion.display()
                    )));
                }
                let text = fs::read_to_string(&companion)?;
                Ok(ExtractedText::from_paged(filename, format, text))
            }
        }
    }
}
