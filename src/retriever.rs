//! Query-time retrieval with citation tracking.
//!
//! Orchestrates one retrieval pass: embed the query, search the index,
//! enforce the minimum-similarity threshold, collapse overlapping hits
//! from the same document, and attach citations.
//!
//! # Algorithm
//!
//! 1. Embed the query through the [`Embedder`] capability.
//! 2. Fetch `candidate_k` candidates from the [`VectorIndex`] (over-fetch,
//!    since thresholding and dedup trim the list).
//! 3. Drop candidates scoring below `min_similarity` — low-quality matches
//!    are never returned just to fill `k`.
//! 4. Walking best-first, drop any hit whose offset range overlaps an
//!    already-kept hit from the same document (the higher-scoring one
//!    wins; overlap-window duplicates would otherwise cite the same
//!    passage twice).
//! 5. Attach a citation per surviving hit and truncate to `k`.

use std::collections::HashSet;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::CoreError;
use crate::index::VectorIndex;
use crate::models::{Citation, RetrievalResult, RetrievedChunk};

/// Bundles all inputs for a single retrieval invocation.
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    /// Natural-language query text.
    pub query: &'a str,
    /// Maximum hits to return.
    pub k: usize,
    /// Restrict results to these document ids.
    pub document_filter: Option<&'a HashSet<String>>,
}

/// Run one retrieval pass against the index.
///
/// # Errors
///
/// [`CoreError::NoResults`] when zero chunks score above the threshold.
/// This is reportable-not-fatal: the caller may relax the threshold or
/// answer "no relevant content found".
pub async fn retrieve(
    index: &VectorIndex,
    embedder: &dyn Embedder,
    config: &RetrievalConfig,
    request: &RetrievalRequest<'_>,
) -> Result<RetrievalResult, CoreError> {
    let query_vec = embedder.embed(request.query).await?;

    let candidate_k = config.candidate_k.max(request.k);
    let candidates = index.search(&query_vec, candidate_k, request.document_filter)?;

    let above: Vec<_> = candidates
        .into_iter()
        .filter(|hit| hit.score >= config.min_similarity)
        .collect();

    if above.is_empty() {
        return Err(CoreError::NoResults {
            threshold: config.min_similarity,
        });
    }

    // Candidates arrive best-first from the index, so a linear pass keeps
    // the higher-scoring member of every overlapping pair.
    let mut kept: Vec<RetrievedChunk> = Vec::new();
    for hit in above {
        if kept.len() == request.k {
            break;
        }
        let overlaps_kept = kept.iter().any(|existing| {
            existing.citation.document_id == hit.meta.document_id
                && ranges_overlap(
                    (existing.citation.start, existing.citation.end),
                    (hit.meta.start, hit.meta.end),
                )
        });
        if overlaps_kept {
            continue;
        }
        kept.push(RetrievedChunk {
            chunk_id: hit.chunk_id,
            score: hit.score,
            text: hit.meta.text,
            citation: Citation::new(
                &hit.meta.document_id,
                hit.meta.start,
                hit.meta.end,
                hit.meta.page,
            ),
        });
    }

    tracing::debug!(
        query = request.query,
        hits = kept.len(),
        threshold = config.min_similarity,
        "retrieval complete"
    );

    Ok(RetrievalResult {
        query: request.query.to_string(),
        hits: kept,
    })
}

fn ranges_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}
