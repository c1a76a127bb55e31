//! Boundary-aware text chunker with offset provenance.
//!
//! Splits document text into [`Chunk`]s no larger than a configured byte
//! bound, preferring semantic boundaries and carrying a configurable
//! overlap window backward across consecutive chunks so retrieval keeps
//! context near cut points.
//!
//! # Algorithm
//!
//! 1. Walk the text in stride windows of `max_chunk_size - overlap_size`
//!    bytes, snapped to UTF-8 char boundaries.
//! 2. Inside each window, cut at the last paragraph break (`\n\n`); failing
//!    that, the last sentence end (`. `, `! `, `? `) or line break; failing
//!    that, hard-cut at the window end.
//! 3. Each chunk after the first starts `overlap_size` bytes before its
//!    window (clamped to the previous chunk's start), so no chunk exceeds
//!    `max_chunk_size` and consecutive offset ranges share exactly the
//!    overlap window.
//!
//! Offsets are byte offsets into the source text, always on char
//! boundaries. Dropping each chunk's leading overlap and concatenating
//! reproduces the document byte-for-byte — see [`rejoin`].
//!
//! Form feeds (`\x0C`) are treated as page breaks; when present, each chunk
//! records the 1-based page its start offset falls on.

use sha2::{Digest, Sha256};

use crate::config::{ChunkingConfig, MIN_CHUNK_STRIDE};
use crate::error::CoreError;
use crate::models::{chunk_id, Chunk};

/// Split a document's text into overlapping chunks.
///
/// The output is deterministic for a fixed input and config. Chunks carry
/// contiguous indices from 0 and together cover the text with no gaps.
///
/// # Errors
///
/// - [`CoreError::EmptyDocument`] for zero-length text.
/// - [`CoreError::InvalidConfig`] when `overlap_size >= max_chunk_size`
///   or the stride falls below [`MIN_CHUNK_STRIDE`].
pub fn chunk_document(
    document_id: &str,
    text: &str,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, CoreError> {
    if config.max_chunk_size == 0 || config.overlap_size >= config.max_chunk_size {
        return Err(CoreError::InvalidConfig(format!(
            "overlap_size ({}) must be < max_chunk_size ({})",
            config.overlap_size, config.max_chunk_size
        )));
    }
    let stride = config.max_chunk_size - config.overlap_size;
    if stride < MIN_CHUNK_STRIDE {
        return Err(CoreError::InvalidConfig(format!(
            "chunking stride must be >= {} bytes, got {}",
            MIN_CHUNK_STRIDE, stride
        )));
    }
    if text.is_empty() {
        return Err(CoreError::EmptyDocument(document_id.to_string()));
    }

    // Cut points 0 = c0 < c1 < ... < cn = len. Each segment [c(i-1), c(i))
    // is at most `stride` bytes; the overlap is layered on afterwards.
    let mut cuts = vec![0usize];
    let mut pos = 0usize;
    while text.len() - pos > stride {
        let hard_end = floor_char_boundary(text, pos + stride);
        let cut = match boundary_cut(&text[pos..hard_end]) {
            Some(at) => pos + at,
            None => hard_end,
        };
        cuts.push(cut);
        pos = cut;
    }
    cuts.push(text.len());

    let ff_positions: Vec<usize> = text.match_indices('\x0C').map(|(i, _)| i).collect();

    let mut chunks = Vec::with_capacity(cuts.len() - 1);
    for i in 1..cuts.len() {
        let seg_start = cuts[i - 1];
        let end = cuts[i];
        let start = if i == 1 {
            0
        } else {
            let prev_seg_start = cuts[i - 2];
            let back = config.overlap_size.min(seg_start - prev_seg_start);
            ceil_char_boundary(text, seg_start - back)
        };

        let page = if ff_positions.is_empty() {
            None
        } else {
            // A chunk starting on a form feed belongs to the page that
            // break opens, so anchor past any leading breaks.
            let mut anchor = start;
            while anchor < end && text.as_bytes()[anchor] == 0x0C {
                anchor += 1;
            }
            let breaks_before = ff_positions.partition_point(|&p| p < anchor);
            Some(breaks_before as u32 + 1)
        };

        let index = (i - 1) as u32;
        chunks.push(Chunk {
            id: chunk_id(document_id, index),
            document_id: document_id.to_string(),
            index,
            start,
            end,
            text: text[start..end].to_string(),
            page,
            hash: hash_text(&text[start..end]),
        });
    }

    Ok(chunks)
}

/// Reconstruct the original document text from its chunks.
///
/// Drops each chunk's leading overlap (`previous.end - current.start`
/// bytes) and concatenates. Inverse of [`chunk_document`] for chunks in
/// index order.
pub fn rejoin(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut prev_end = 0usize;
    for chunk in chunks {
        let overlap = prev_end.saturating_sub(chunk.start);
        out.push_str(&chunk.text[overlap..]);
        prev_end = chunk.end;
    }
    out
}

/// Best cut position inside a window, or `None` to hard-cut at its end.
///
/// Returned positions are in `(0, window.len()]` and land just after the
/// boundary, so separators stay with the earlier chunk.
fn boundary_cut(window: &str) -> Option<usize> {
    if let Some(p) = window.rfind("\n\n") {
        return Some(p + 2);
    }
    let sentence = [". ", "! ", "? "]
        .iter()
        .filter_map(|pat| window.rfind(pat).map(|p| p + 2))
        .max();
    if sentence.is_some() {
        return sentence;
    }
    window.rfind('\n').map(|p| p + 1)
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Snap a byte index forward to the nearest valid UTF-8 char boundary.
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
