//! Ingestion normalizer: content-type detection, text extraction and chunking.
//!
//! [`IngestionNormalizer::normalize`] turns a raw [`Document`] into a
//! [`NormalizedDocument`] whose chunks tile the extracted text exactly.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::chunking::Chunker;
use crate::document::{Document, NormalizedDocument};
use crate::error::{DocuMindError, Result};

/// Formats the normalizer can extract text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// `text/plain`
    PlainText,
    /// `text/markdown`, `text/x-markdown`
    Markdown,
    /// `text/csv`
    Csv,
    /// `text/html`
    Html,
    /// `application/json`
    Json,
}

impl ContentKind {
    /// Parse a MIME content type such as `text/html; charset=UTF-8`.
    ///
    /// # Errors
    ///
    /// Returns [`DocuMindError::UnsupportedFormat`] for unknown types and for
    /// charsets other than UTF-8 or US-ASCII.
    pub fn parse(content_type: &str) -> Result<Self> {
        let mut parts = content_type.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();

        for param in parts {
            let Some((name, value)) = param.split_once('=') else { continue };
            if name.trim().eq_ignore_ascii_case("charset") {
                let charset = value.trim().trim_matches('"').to_ascii_lowercase();
                if !matches!(charset.as_str(), "utf-8" | "utf8" | "us-ascii") {
                    return Err(unsupported(content_type, format!("charset '{charset}' is not supported")));
                }
            }
        }

        match essence.as_str() {
            "text/plain" => Ok(ContentKind::PlainText),
            "text/markdown" | "text/x-markdown" => Ok(ContentKind::Markdown),
            "text/csv" => Ok(ContentKind::Csv),
            "text/html" => Ok(ContentKind::Html),
            "application/json" => Ok(ContentKind::Json),
            "" => Err(unsupported(content_type, "missing content type".to_string())),
            _ => Err(unsupported(content_type, "no extractor for this type".to_string())),
        }
    }
}

fn unsupported(content_type: &str, reason: String) -> DocuMindError {
    DocuMindError::UnsupportedFormat { content_type: content_type.to_string(), reason }
}

/// Extract clean text from raw bytes of the given content type.
///
/// # Errors
///
/// Returns [`DocuMindError::UnsupportedFormat`] if the type is unknown or the
/// bytes are not valid for it.
pub fn extract_text(content_type: &str, bytes: &[u8]) -> Result<String> {
    let kind = ContentKind::parse(content_type)?;
    let decoded = std::str::from_utf8(bytes)
        .map_err(|e| unsupported(content_type, format!("invalid UTF-8: {e}")))?;
    let decoded = decoded.strip_prefix('\u{feff}').unwrap_or(decoded);

    let raw = match kind {
        ContentKind::PlainText | ContentKind::Markdown | ContentKind::Csv => decoded.to_string(),
        ContentKind::Html => html_to_text(decoded),
        ContentKind::Json => {
            let value: Value = serde_json::from_str(decoded)
                .map_err(|e| unsupported(content_type, format!("malformed JSON: {e}")))?;
            let mut leaves = Vec::new();
            collect_strings(&value, &mut leaves);
            leaves.join("\n")
        }
    };
    Ok(clean_text(&raw))
}

/// Normalise line endings and drop control characters other than `\n` and `\t`.
pub fn clean_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    unified.chars().filter(|c| !c.is_control() || *c == '\n' || *c == '\t').collect()
}

const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

fn html_to_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let mut pieces: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let skipped = node.ancestors().filter_map(|a| a.value().as_element()).any(|element| {
            SKIPPED_ELEMENTS.contains(&element.name())
        });
        if skipped {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed);
        }
    }

    pieces.join("\n")
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

/// Converts uploaded documents into clean, chunked text.
pub struct IngestionNormalizer {
    chunker: Arc<dyn Chunker>,
}

impl IngestionNormalizer {
    /// Create a normalizer that splits text with `chunker`.
    pub fn new(chunker: Arc<dyn Chunker>) -> Self {
        Self { chunker }
    }

    /// Extract and chunk a document.
    ///
    /// # Errors
    ///
    /// - [`DocuMindError::UnsupportedFormat`] if the content cannot be parsed.
    /// - [`DocuMindError::EmptyDocument`] if no non-whitespace text remains.
    pub fn normalize(&self, document: Document) -> Result<NormalizedDocument> {
        let text = extract_text(&document.content_type, &document.content)?;
        if text.trim().is_empty() {
            return Err(DocuMindError::EmptyDocument { document_id: document.id });
        }

        let chunks = self.chunker.chunk(&document.id, &text);
        debug!(
            document.id = %document.id,
            text_len = text.len(),
            chunk_count = chunks.len(),
            "normalized document"
        );
        Ok(NormalizedDocument { document, text, chunks })
    }
}
