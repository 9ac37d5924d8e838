//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`BoundaryChunker`] — cuts at paragraph, sentence, then word boundaries
//! - [`FixedSizeChunker`] — cuts every `max_chunk_chars` characters
//!
//! Both produce chunks whose spans tile the input exactly: concatenating the
//! chunk texts in sequence order reproduces the text, with no gaps and no
//! overlap. The overlap window is carried separately as [`Chunk::context`].

use crate::document::{Chunk, Span, chunk_id};
use crate::text::char_offset;

/// A strategy for splitting extracted text into chunks.
pub trait Chunker: Send + Sync {
    /// Split `text` into ordered chunks belonging to `document_id`.
    ///
    /// Returns an empty `Vec` for empty text.
    fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk>;
}

/// Separator classes tried in order when looking for a cut.
const SEPARATOR_CLASSES: [&[&str]; 3] = [&["\n\n"], &[". ", "! ", "? ", "\n"], &[" "]];

/// Splits text at the most natural boundary within `max_chunk_chars`.
///
/// The last paragraph break in the window wins; failing that the last
/// sentence end, then the last space, then a hard cut. A boundary that would
/// keep less than a quarter of the window is skipped in favour of the next
/// class so chunks do not degenerate into fragments.
///
/// # Example
///
/// ```rust,ignore
/// use documind_rag::BoundaryChunker;
///
/// let chunker = BoundaryChunker::new(1000, 200);
/// let chunks = chunker.chunk("doc-1", &text);
/// ```
#[derive(Debug, Clone)]
pub struct BoundaryChunker {
    max_chunk_chars: usize,
    overlap_chars: usize,
}

impl BoundaryChunker {
    /// Create a new `BoundaryChunker`.
    ///
    /// # Arguments
    ///
    /// * `max_chunk_chars` — maximum number of characters per chunk (at least 1)
    /// * `overlap_chars` — characters of preceding text kept as context
    pub fn new(max_chunk_chars: usize, overlap_chars: usize) -> Self {
        Self { max_chunk_chars: max_chunk_chars.max(1), overlap_chars }
    }

    fn find_cut(&self, window: &str) -> usize {
        let min_keep = char_offset(window, self.max_chunk_chars / 4).max(1);
        for class in SEPARATOR_CLASSES {
            let best = class
                .iter()
                .filter_map(|sep| window.rfind(sep).map(|pos| pos + sep.len()))
                .filter(|&cut| cut >= min_keep)
                .max();
            if let Some(cut) = best {
                return cut;
            }
        }
        window.len()
    }
}

impl Chunker for BoundaryChunker {
    fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        tile(document_id, text, self.overlap_chars, |rest| {
            let window_end = char_offset(rest, self.max_chunk_chars);
            if window_end == rest.len() { window_end } else { self.find_cut(&rest[..window_end]) }
        })
    }
}

/// Splits text into consecutive runs of exactly `max_chunk_chars` characters
/// (the last one may be shorter).
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    max_chunk_chars: usize,
    overlap_chars: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    pub fn new(max_chunk_chars: usize, overlap_chars: usize) -> Self {
        Self { max_chunk_chars: max_chunk_chars.max(1), overlap_chars }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        tile(document_id, text, self.overlap_chars, |rest| char_offset(rest, self.max_chunk_chars))
    }
}

/// Walk `text` from the start, asking `next_len` for the byte length of each
/// chunk given the remaining text. `next_len` must return a positive length
/// on a character boundary.
fn tile<F>(document_id: &str, text: &str, overlap_chars: usize, next_len: F) -> Vec<Chunk>
where
    F: Fn(&str) -> usize,
{
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let rest = &text[start..];
        let len = next_len(rest).clamp(1, rest.len());
        let mut end = start + len;
        while !text.is_char_boundary(end) {
            end += 1;
        }

        let sequence = chunks.len();
        chunks.push(Chunk {
            id: chunk_id(document_id, sequence),
            document_id: document_id.to_string(),
            sequence,
            span: Span::new(start, end),
            text: text[start..end].to_string(),
            context: overlap_context(&text[..start], overlap_chars).to_string(),
        });
        start = end;
    }

    chunks
}

/// The last `overlap_chars` characters of `prefix`.
fn overlap_context(prefix: &str, overlap_chars: usize) -> &str {
    if overlap_chars == 0 {
        return "";
    }
    let from = prefix.char_indices().rev().nth(overlap_chars - 1).map_or(0, |(i, _)| i);
    &prefix[from..]
}
