use std::path::Path;

use serde::Deserialize;

use crate::error::CoreError;

/// Smallest permitted chunking stride (`max_chunk_size - overlap_size`),
/// one maximal UTF-8 scalar. Below this the chunker could not guarantee
/// the size bound without splitting a character.
pub const MIN_CHUNK_STRIDE: usize = 4;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub themes: ThemeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Upper bound on chunk size in bytes; holds even for boundary-free text.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    /// Bytes shared between consecutive chunks. Must be < `max_chunk_size`.
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap_size: default_overlap_size(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    1200
}
fn default_overlap_size() -> usize {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Hits scoring below this are dropped even if `k` is not filled.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Candidates fetched from the index before threshold/dedup trimming.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_min_similarity() -> f32 {
    0.25
}
fn default_candidate_k() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hash"` (deterministic, offline) or `"remote"` (OpenAI-compatible).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint for the remote provider, e.g. `https://api.openai.com/v1/embeddings`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Chunks per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Bounded retry count for transient provider failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Caller-supplied timeout applied to every provider call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Cap on concurrently in-flight embedding requests.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            endpoint: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_in_flight() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThemeConfig {
    /// Clusters merge while their centroid similarity stays at or above this.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,
    #[serde(default = "default_max_themes")]
    pub max_themes: usize,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            merge_threshold: default_merge_threshold(),
            max_themes: default_max_themes(),
            max_keywords: default_max_keywords(),
        }
    }
}

fn default_merge_threshold() -> f32 {
    0.25
}
fn default_max_themes() -> usize {
    8
}
fn default_max_keywords() -> usize {
    5
}

/// Load and validate a TOML configuration file.
pub fn load_config(path: &Path) -> Result<Config, CoreError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| CoreError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
    validate(&config)?;
    Ok(config)
}

/// Validate a configuration, whether loaded from disk or built in code.
pub fn validate(config: &Config) -> Result<(), CoreError> {
    let c = &config.chunking;
    if c.max_chunk_size == 0 {
        return Err(CoreError::InvalidConfig(
            "chunking.max_chunk_size must be > 0".to_string(),
        ));
    }
    if c.overlap_size >= c.max_chunk_size {
        return Err(CoreError::InvalidConfig(format!(
            "chunking.overlap_size ({}) must be < max_chunk_size ({})",
            c.overlap_size, c.max_chunk_size
        )));
    }
    if c.max_chunk_size - c.overlap_size < MIN_CHUNK_STRIDE {
        return Err(CoreError::InvalidConfig(format!(
            "chunking stride (max_chunk_size - overlap_size) must be >= {}",
            MIN_CHUNK_STRIDE
        )));
    }

    if !(-1.0..=1.0).contains(&config.retrieval.min_similarity) {
        return Err(CoreError::InvalidConfig(
            "retrieval.min_similarity must be in [-1.0, 1.0]".to_string(),
        ));
    }
    if config.retrieval.candidate_k == 0 {
        return Err(CoreError::InvalidConfig(
            "retrieval.candidate_k must be >= 1".to_string(),
        ));
    }

    let e = &config.embedding;
    if e.batch_size == 0 {
        return Err(CoreError::InvalidConfig(
            "embedding.batch_size must be >= 1".to_string(),
        ));
    }
    if e.max_in_flight == 0 {
        return Err(CoreError::InvalidConfig(
            "embedding.max_in_flight must be >= 1".to_string(),
        ));
    }
    match e.provider.as_str() {
        "hash" => {}
        "remote" => {
            if e.model.is_none() {
                return Err(CoreError::InvalidConfig(
                    "embedding.model required for the remote provider".to_string(),
                ));
            }
            if e.dims.is_none() || e.dims == Some(0) {
                return Err(CoreError::InvalidConfig(
                    "embedding.dims must be > 0 for the remote provider".to_string(),
                ));
            }
        }
        other => {
            return Err(CoreError::InvalidConfig(format!(
                "unknown embedding provider '{}'. Must be hash or remote.",
                other
            )));
        }
    }

    if !(-1.0..=1.0).contains(&config.themes.merge_threshold) {
        return Err(CoreError::InvalidConfig(
            "themes.merge_threshold must be in [-1.0, 1.0]".to_string(),
        ));
    }
    if config.themes.max_themes == 0 {
        return Err(CoreError::InvalidConfig(
            "themes.max_themes must be >= 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn overlap_must_be_smaller_than_max() {
        let mut config = Config::default();
        config.chunking.overlap_size = config.chunking.max_chunk_size;
        assert!(matches!(
            validate(&config),
            Err(CoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn stride_floor_enforced() {
        let mut config = Config::default();
        config.chunking.max_chunk_size = 10;
        config.chunking.overlap_size = 8;
        assert!(matches!(
            validate(&config),
            Err(CoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn remote_provider_requires_model_and_dims() {
        let mut config = Config::default();
        config.embedding.provider = "remote".to_string();
        assert!(validate(&config).is_err());

        config.embedding.model = Some("text-embedding-3-small".to_string());
        config.embedding.dims = Some(1536);
        validate(&config).unwrap();
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            max_chunk_size = 800

            [retrieval]
            min_similarity = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_chunk_size, 800);
        assert_eq!(config.chunking.overlap_size, 120);
        assert_eq!(config.embedding.provider, "hash");
        validate(&config).unwrap();
    }
}
