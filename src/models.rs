//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the documents, chunks, citations, and themes that
//! flow from ingestion through retrieval and theme extraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format tag recorded for an ingested document.
///
/// The core never parses binary formats itself; the tag is provenance
/// metadata supplied by the upstream extraction collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Pptx,
    Text,
    /// Scanned page imagery whose text arrived via OCR.
    Image,
}

/// An ingested document: extracted plain text plus provenance metadata.
///
/// Immutable once ingested; removed only by explicit corpus operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: Option<String>,
    pub format: DocumentFormat,
    pub text: String,
    pub ingested_at: DateTime<Utc>,
}

/// A bounded contiguous span of a document's text, the unit of embedding
/// and retrieval.
///
/// `start..end` are byte offsets into the source text, always on UTF-8
/// char boundaries. Consecutive chunks of a document share at most the
/// configured overlap window and together cover the full text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{document_id}#{index}"` — unique within the corpus, deterministic.
    pub id: String,
    pub document_id: String,
    pub index: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// 1-based page the chunk starts on, when page breaks are present.
    pub page: Option<u32>,
    /// SHA-256 of the chunk text, for staleness detection.
    pub hash: String,
}

/// Compose the deterministic chunk id for a document/index pair.
pub fn chunk_id(document_id: &str, index: u32) -> String {
    format!("{}#{}", document_id, index)
}

/// A (document id, offset range) pointer proving where a retrieved chunk
/// came from, with a human-readable locator for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub start: usize,
    pub end: usize,
    pub page: Option<u32>,
    /// e.g. `"page 2, chars 120-480"`.
    pub locator: String,
}

impl Citation {
    pub fn new(document_id: &str, start: usize, end: usize, page: Option<u32>) -> Self {
        let locator = match page {
            Some(p) => format!("page {}, chars {}-{}", p, start, end),
            None => format!("chars {}-{}", start, end),
        };
        Self {
            document_id: document_id.to_string(),
            start,
            end,
            page,
            locator,
        }
    }
}

/// One retrieved chunk with its similarity score and citation.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub score: f32,
    pub text: String,
    pub citation: Citation,
}

/// Ordered result set for one query. Ephemeral: constructed fresh per
/// query, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<RetrievedChunk>,
}

/// A cluster of semantically related chunks with a synthesized label.
#[derive(Debug, Clone, Serialize)]
pub struct Theme {
    pub label: String,
    pub keywords: Vec<String>,
    pub description: String,
    /// Supporting chunks, ordered by similarity to the cluster centroid.
    pub chunk_ids: Vec<String>,
    /// Mean member-to-centroid cosine similarity.
    pub avg_similarity: f32,
}
