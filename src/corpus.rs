//! Session corpus facade.
//!
//! Owns the document registry, the vector index, and the embedder, and
//! coordinates the full ingestion flow: text → chunking → batched
//! embedding → indexing. Retrieval and theme extraction delegate to their
//! components over the same state.
//!
//! # Ingestion pipeline
//!
//! Chunks are embedded in batches issued concurrently under a bounded
//! in-flight cap (`embedding.max_in_flight`), each wrapped in the
//! caller-supplied timeout. A batch that fails transiently after the
//! provider's bounded retries marks only its own chunks failed-to-embed;
//! the rest of the document still lands in the index. A fatal provider
//! failure propagates as an error — after all in-flight batches have
//! drained, never by abandoning them.
//!
//! Cancellation is checked between batch issuances; entries already
//! committed to the index remain valid (no rollback).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::chunker::chunk_document;
use crate::config::{self, Config};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{CoreError, ExternalError};
use crate::index::{ChunkMeta, VectorIndex};
use crate::models::{Document, DocumentFormat, RetrievalResult, Theme};
use crate::retriever::{self, RetrievalRequest};
use crate::themes::{ThemeExtractor, ThemeInput};

/// Cooperative cancellation flag, checked between chunk-level units of work.
pub type CancelFlag = Arc<AtomicBool>;

/// A document handed to the corpus: extracted plain text plus metadata.
///
/// OCR and binary-format parsing happen upstream; the corpus only ever
/// sees text.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    /// Explicit id, or `None` to have one generated.
    pub id: Option<String>,
    pub title: Option<String>,
    pub format: DocumentFormat,
    pub text: String,
}

/// A chunk that could not be embedded and was excluded from the index.
#[derive(Debug, Clone)]
pub struct FailedChunk {
    pub chunk_id: String,
    pub reason: String,
}

/// Outcome of one document ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks_total: usize,
    pub chunks_indexed: usize,
    /// Chunks excluded after transient embedding failures or timeouts.
    pub failed: Vec<FailedChunk>,
    /// True when a cancellation flag stopped issuance early.
    pub cancelled: bool,
}

/// One research session's document set and its retrieval machinery.
pub struct Corpus {
    config: Config,
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    documents: RwLock<HashMap<String, Document>>,
}

impl Corpus {
    /// Build a corpus with the embedder named in the configuration.
    pub fn new(config: Config) -> Result<Self, CoreError> {
        config::validate(&config)?;
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::assemble(config, embedder))
    }

    /// Build a corpus around a caller-supplied embedder (e.g. a test fake).
    pub fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self, CoreError> {
        config::validate(&config)?;
        Ok(Self::assemble(config, embedder))
    }

    fn assemble(config: Config, embedder: Arc<dyn Embedder>) -> Self {
        let index = VectorIndex::new(embedder.dims());
        Self {
            config,
            embedder,
            index,
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying index, e.g. for snapshot persistence.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Ingest one document: chunk, embed, and index its text.
    ///
    /// Returns a report listing any chunks excluded by transient
    /// embedding failures. A fatal embedding failure returns an error
    /// once in-flight batches have drained; entries committed before the
    /// failure stay in the index.
    ///
    /// # Errors
    ///
    /// - [`CoreError::EmptyDocument`] for zero-length text.
    /// - [`CoreError::DuplicateId`] if the document id is already present.
    /// - [`CoreError::External`] on a fatal (non-retryable) provider failure.
    pub async fn ingest(
        &self,
        source: DocumentSource,
        cancel: Option<&CancelFlag>,
    ) -> Result<IngestReport, CoreError> {
        let document_id = source
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        {
            let docs = self.documents.read().unwrap();
            if docs.contains_key(&document_id) {
                return Err(CoreError::DuplicateId(document_id));
            }
        }

        let chunks = chunk_document(&document_id, &source.text, &self.config.chunking)?;

        {
            let mut docs = self.documents.write().unwrap();
            docs.insert(
                document_id.clone(),
                Document {
                    id: document_id.clone(),
                    title: source.title,
                    format: source.format,
                    text: source.text,
                    ingested_at: Utc::now(),
                },
            );
        }

        let batch_size = self.config.embedding.batch_size;
        let timeout = Duration::from_secs(self.config.embedding.timeout_secs);
        let semaphore = Arc::new(Semaphore::new(self.config.embedding.max_in_flight));

        let mut handles = Vec::new();
        let mut cancelled = false;

        for (batch_idx, batch) in chunks.chunks(batch_size).enumerate() {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    cancelled = true;
                    break;
                }
            }

            // Acquiring before spawn caps in-flight provider calls.
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedder = Arc::clone(&self.embedder);

            handles.push((
                batch_idx,
                tokio::spawn(async move {
                    let _permit = permit;
                    match tokio::time::timeout(timeout, embedder.embed_batch(&texts)).await {
                        Ok(result) => result,
                        Err(_) => Err(ExternalError::Timeout(timeout.as_secs())),
                    }
                }),
            ));
        }

        let mut report = IngestReport {
            document_id: document_id.clone(),
            chunks_total: chunks.len(),
            chunks_indexed: 0,
            failed: Vec::new(),
            cancelled,
        };
        let mut hard_failure: Option<ExternalError> = None;

        // Drain every issued batch before surfacing any fatal failure.
        for (batch_idx, handle) in handles {
            let start = batch_idx * batch_size;
            let end = (start + batch_size).min(chunks.len());
            let batch = &chunks[start..end];

            match handle.await {
                Ok(Ok(vectors)) => {
                    for (chunk, vector) in batch.iter().zip(vectors) {
                        self.index.insert(
                            &chunk.id,
                            vector,
                            ChunkMeta {
                                document_id: chunk.document_id.clone(),
                                start: chunk.start,
                                end: chunk.end,
                                page: chunk.page,
                                text: chunk.text.clone(),
                            },
                        )?;
                        report.chunks_indexed += 1;
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(batch = batch_idx, error = %e, "embedding batch failed");
                    for chunk in batch {
                        report.failed.push(FailedChunk {
                            chunk_id: chunk.id.clone(),
                            reason: e.to_string(),
                        });
                    }
                    if !e.is_retryable() && hard_failure.is_none() {
                        hard_failure = Some(e);
                    }
                }
                Err(join_err) => {
                    for chunk in batch {
                        report.failed.push(FailedChunk {
                            chunk_id: chunk.id.clone(),
                            reason: join_err.to_string(),
                        });
                    }
                    if hard_failure.is_none() {
                        hard_failure = Some(ExternalError::Fatal(format!(
                            "embedding task failed: {}",
                            join_err
                        )));
                    }
                }
            }
        }

        if let Some(e) = hard_failure {
            return Err(e.into());
        }

        tracing::info!(
            document_id = %report.document_id,
            chunks_total = report.chunks_total,
            chunks_indexed = report.chunks_indexed,
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "document ingested"
        );
        Ok(report)
    }

    /// Remove a document and all its index entries.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if no such document was ingested.
    pub fn remove_document(&self, document_id: &str) -> Result<(), CoreError> {
        {
            let mut docs = self.documents.write().unwrap();
            if docs.remove(document_id).is_none() {
                return Err(CoreError::NotFound(document_id.to_string()));
            }
        }
        let removed = self.index.remove_document(document_id);
        tracing::debug!(document_id, removed, "document removed");
        Ok(())
    }

    /// Destroy all documents and index entries (explicit corpus reset).
    pub fn reset(&self) {
        self.documents.write().unwrap().clear();
        self.index.clear();
    }

    /// Ids of all ingested documents, sorted.
    pub fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.documents.read().unwrap().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn get_document(&self, document_id: &str) -> Option<Document> {
        self.documents.read().unwrap().get(document_id).cloned()
    }

    /// Retrieve the `k` most relevant chunks for a query, with citations.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        document_filter: Option<&HashSet<String>>,
    ) -> Result<RetrievalResult, CoreError> {
        retriever::retrieve(
            &self.index,
            self.embedder.as_ref(),
            &self.config.retrieval,
            &RetrievalRequest {
                query,
                k,
                document_filter,
            },
        )
        .await
    }

    /// Extract themes across the whole corpus.
    pub async fn corpus_themes(&self) -> Result<Vec<Theme>, CoreError> {
        let inputs: Vec<ThemeInput> = self
            .index
            .entries()
            .into_iter()
            .map(|e| ThemeInput {
                chunk_id: e.chunk_id,
                document_id: e.meta.document_id,
                text: e.meta.text,
                vector: e.vector,
            })
            .collect();
        ThemeExtractor::new(self.config.themes.clone())
            .extract(&inputs)
            .await
    }

    /// Extract themes over one retrieval result's chunk set.
    pub async fn result_themes(&self, result: &RetrievalResult) -> Result<Vec<Theme>, CoreError> {
        let mut inputs = Vec::with_capacity(result.hits.len());
        for hit in &result.hits {
            if let Some(entry) = self.index.get(&hit.chunk_id) {
                inputs.push(ThemeInput {
                    chunk_id: entry.chunk_id,
                    document_id: entry.meta.document_id,
                    text: entry.meta.text,
                    vector: entry.vector,
                });
            }
        }
        ThemeExtractor::new(self.config.themes.clone())
            .extract(&inputs)
            .await
    }
}
