//! Embedding capability interface and implementations.
//!
//! The core depends on embeddings only through the [`Embedder`] trait:
//! - **[`HashEmbedder`]** — deterministic feature-hash embedder with no
//!   external dependency; what the test suite runs against.
//! - **[`RemoteEmbedder`]** — OpenAI-compatible HTTP provider with
//!   batching, per-call timeout, and exponential backoff retry.
//!
//! Also provides the vector utilities shared by the index and the theme
//! extractor: [`cosine_similarity`], [`normalize_in_place`], and the
//! little-endian blob codec used by the snapshot format.
//!
//! # Retry Strategy
//!
//! The remote provider retries transient failures with exponential
//! backoff (1s, 2s, 4s, ... capped at 32s):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//!
//! When retries are exhausted the failure surfaces as
//! [`ExternalError::Transient`] so the ingestion pipeline can record the
//! affected chunks as failed-to-embed instead of dropping them silently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{CoreError, ExternalError};

/// Default endpoint for the remote provider.
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

/// Maximum backoff exponent (caps delay at 2^5 = 32s).
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Trait for embedding providers.
///
/// Implementations must be deterministic for a fixed model version and
/// must preserve input order in [`embed_batch`](Embedder::embed_batch).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalError>;

    /// Embed a single text (e.g. a search query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExternalError> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| ExternalError::Fatal("empty embedding response".to_string()))
    }
}

/// Create the appropriate [`Embedder`] from configuration.
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"hash"` | [`HashEmbedder`] |
/// | `"remote"` | [`RemoteEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, CoreError> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(HashEmbedder::DEFAULT_DIMS),
        ))),
        "remote" => Ok(Arc::new(RemoteEmbedder::new(config)?)),
        other => Err(CoreError::InvalidConfig(format!(
            "unknown embedding provider '{}'. Must be hash or remote.",
            other
        ))),
    }
}

// ============ Hash Embedder ============

/// Deterministic feature-hash embedder.
///
/// Tokenizes on non-alphanumeric boundaries, buckets each lowercased token
/// into a fixed-dimension slot via SHA-256, accumulates counts, and
/// normalizes to unit length. Texts sharing vocabulary score positive
/// cosine similarity; disjoint texts score zero. No network, no model
/// download, fully reproducible — the embedder the test suite runs on.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIMS: usize = 256;

    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
        }
    }

    fn feature_vector(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            vec[token_bucket(&token, self.dims)] += 1.0;
        }
        normalize_in_place(&mut vec);
        vec
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMS)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "feature-hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalError> {
        Ok(texts.iter().map(|t| self.feature_vector(t)).collect())
    }
}

/// Lowercased alphanumeric tokens of a text. Shared with the theme
/// extractor's keyword synthesis.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Stable bucket for a token: first 8 bytes of its SHA-256, mod `dims`.
fn token_bucket(token: &str, dims: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(bytes) % dims as u64) as usize
}

// ============ Remote Embedder ============

/// Embedding provider for an OpenAI-compatible `POST /embeddings` endpoint.
///
/// Requires `model` and `dims` in config; reads the API key from
/// `OPENAI_API_KEY`. Batches are sent as a single request; transient
/// failures are retried with exponential backoff up to `max_retries`.
pub struct RemoteEmbedder {
    model: String,
    dims: usize,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, CoreError> {
        let model = config.model.clone().ok_or_else(|| {
            CoreError::InvalidConfig("embedding.model required for the remote provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            CoreError::InvalidConfig("embedding.dims required for the remote provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            CoreError::InvalidConfig("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::InvalidConfig(format!("http client: {}", e)))?;

        Ok(Self {
            model,
            dims,
            endpoint,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            let parsed: EmbeddingResponse = response
                .json()
                .await
                .map_err(|e| ExternalError::Fatal(format!("invalid embedding response: {}", e)))?;
            return parse_embedding_response(parsed, texts.len(), self.dims);
        }

        let body_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(ExternalError::Transient(format!(
                "embedding API error {}: {}",
                status, body_text
            )))
        } else {
            Err(ExternalError::Fatal(format!(
                "embedding API error {}: {}",
                status, body_text
            )))
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(MAX_BACKOFF_SHIFT));
                tokio::time::sleep(delay).await;
            }

            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, error = %e, "transient embedding failure");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| ExternalError::Transient("embedding failed after retries".into())))
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

fn classify_request_error(e: reqwest::Error) -> ExternalError {
    if e.is_timeout() {
        ExternalError::Transient(format!("embedding request timed out: {}", e))
    } else {
        ExternalError::Transient(format!("embedding request failed: {}", e))
    }
}

/// Reorder by the provider's index field and validate shape.
fn parse_embedding_response(
    response: EmbeddingResponse,
    expected_count: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>, ExternalError> {
    let mut data = response.data;
    if data.len() != expected_count {
        return Err(ExternalError::Fatal(format!(
            "embedding response has {} vectors, expected {}",
            data.len(),
            expected_count
        )));
    }
    data.sort_by_key(|d| d.index);
    for datum in &data {
        if datum.embedding.len() != expected_dims {
            return Err(ExternalError::Fatal(format!(
                "embedding has {} dims, expected {}",
                datum.embedding.len(),
                expected_dims
            )));
        }
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

// ============ Vector utilities ============

/// Scale a vector to unit length in place. Zero vectors are left as-is
/// (they score 0 against everything).
pub fn normalize_in_place(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
