//! Error taxonomy for the retrieval core.
//!
//! Two layers: [`ExternalError`] covers failures of external collaborators
//! (embedding provider, text generator) and knows whether a failure is
//! retryable; [`CoreError`] is the crate-wide error type every public
//! operation returns.

use thiserror::Error;

/// Failure of an external collaborator call (embedding or text generation).
///
/// Transient and timeout failures are retryable with backoff; fatal
/// failures (bad request, invalid credentials) are reported immediately.
#[derive(Debug, Error)]
pub enum ExternalError {
    /// Rate limit, server error, or network failure. Retry with backoff.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// The call exceeded the caller-supplied timeout.
    #[error("provider call timed out after {0}s")]
    Timeout(u64),
    /// Non-retryable provider failure (client error, bad configuration).
    #[error("provider failure: {0}")]
    Fatal(String),
}

impl ExternalError {
    /// Whether the pipeline should retry this failure (bounded, with backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExternalError::Transient(_) | ExternalError::Timeout(_))
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A document with zero-length text was submitted for ingestion.
    #[error("document {0}: no text to ingest")]
    EmptyDocument(String),

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An id was inserted twice. Re-insertion requires an explicit remove.
    #[error("id {0} is already present")]
    DuplicateId(String),

    /// The referenced id is absent from the index or registry.
    #[error("id {0} not found")]
    NotFound(String),

    /// A vector's length does not match the index dimensionality.
    #[error("vector has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// No chunk scored above the similarity threshold. Recoverable: the
    /// caller may relax the threshold or report "no relevant content".
    #[error("no chunks scored above the similarity threshold {threshold}")]
    NoResults { threshold: f32 },

    /// Persisted index state is internally inconsistent. Fatal at load time.
    #[error("index snapshot is corrupt: {0}")]
    CorruptSnapshot(String),

    /// The operation was cancelled between chunk-level units of work.
    #[error("operation cancelled")]
    Cancelled,

    /// An external collaborator call failed after bounded retries.
    #[error(transparent)]
    External(#[from] ExternalError),

    /// Snapshot file I/O failure.
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        assert!(ExternalError::Transient("429".into()).is_retryable());
        assert!(ExternalError::Timeout(30).is_retryable());
        assert!(!ExternalError::Fatal("400 bad request".into()).is_retryable());
    }

    #[test]
    fn external_error_converts_into_core() {
        let err: CoreError = ExternalError::Fatal("boom".into()).into();
        assert!(matches!(err, CoreError::External(_)));
    }
}
