//! Cross-document theme extraction.
//!
//! Groups a chunk set (a retrieval result or the whole corpus) into
//! thematic clusters by embedding-space proximity, then synthesizes a
//! label, keyword list, and short description per cluster.
//!
//! # Clustering
//!
//! Agglomerative, seed-free, and fully deterministic:
//!
//! 1. Inputs are ordered by chunk id, one singleton cluster each.
//! 2. Repeatedly merge the cluster pair with the highest centroid cosine
//!    similarity; exact ties resolve to the lowest member chunk-id pair.
//! 3. Stop when the best pair falls below `merge_threshold`.
//!
//! Centroids are arithmetic means of unit member vectors. The same input
//! set and config always yield the same cluster membership — there is no
//! randomness to seed.
//!
//! Label synthesis is frequency-based over stopword-filtered terms; the
//! description can optionally be delegated to the external text-generation
//! collaborator, falling back to a template when it fails or is absent.

use std::collections::HashMap;
use std::sync::Arc;

use crate::assemble::TextGenerator;
use crate::config::ThemeConfig;
use crate::embedding::{cosine_similarity, normalize_in_place, tokenize};
use crate::error::CoreError;
use crate::models::Theme;

/// One chunk presented to the extractor.
#[derive(Debug, Clone)]
pub struct ThemeInput {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Common English terms excluded from labels and keywords.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "if",
    "in", "into", "is", "it", "its", "not", "of", "on", "or", "that", "the", "their", "there",
    "they", "this", "to", "was", "were", "which", "will", "with",
];

/// Groups chunks into labeled themes.
pub struct ThemeExtractor {
    config: ThemeConfig,
    summarizer: Option<Arc<dyn TextGenerator>>,
}

struct Cluster {
    /// Indices into the ordered input slice.
    members: Vec<usize>,
    centroid: Vec<f32>,
    /// Lowest member chunk id, the deterministic tie-break key.
    min_id: String,
}

impl ThemeExtractor {
    pub fn new(config: ThemeConfig) -> Self {
        Self {
            config,
            summarizer: None,
        }
    }

    /// Delegate theme descriptions to an external text generator.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn TextGenerator>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Extract themes from a chunk set.
    ///
    /// Output is sorted by supporting-chunk count (desc), then average
    /// member-to-centroid similarity (desc), then label, and truncated to
    /// `max_themes`. Deterministic for a fixed input set and config,
    /// regardless of input order.
    pub async fn extract(&self, inputs: &[ThemeInput]) -> Result<Vec<Theme>, CoreError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let dims = inputs[0].vector.len();
        for input in inputs {
            if input.vector.len() != dims {
                return Err(CoreError::DimensionMismatch {
                    expected: dims,
                    got: input.vector.len(),
                });
            }
        }

        // Canonical ordering makes the merge sequence independent of how
        // the caller assembled the input slice.
        let mut ordered: Vec<&ThemeInput> = inputs.iter().collect();
        ordered.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));

        let unit_vectors: Vec<Vec<f32>> = ordered
            .iter()
            .map(|input| {
                let mut v = input.vector.clone();
                normalize_in_place(&mut v);
                v
            })
            .collect();

        let mut clusters: Vec<Cluster> = ordered
            .iter()
            .enumerate()
            .map(|(i, input)| Cluster {
                members: vec![i],
                centroid: unit_vectors[i].clone(),
                min_id: input.chunk_id.clone(),
            })
            .collect();

        loop {
            let mut best: Option<(f32, usize, usize)> = None;
            for i in 0..clusters.len() {
                for j in (i + 1)..clusters.len() {
                    let sim = cosine_similarity(&clusters[i].centroid, &clusters[j].centroid);
                    let take = match best {
                        None => true,
                        Some((best_sim, bi, bj)) => {
                            if sim > best_sim {
                                true
                            } else if sim < best_sim {
                                false
                            } else {
                                pair_key(&clusters[i], &clusters[j])
                                    < pair_key(&clusters[bi], &clusters[bj])
                            }
                        }
                    };
                    if take {
                        best = Some((sim, i, j));
                    }
                }
            }

            match best {
                Some((sim, i, j)) if sim >= self.config.merge_threshold => {
                    let absorbed = clusters.remove(j);
                    let target = &mut clusters[i];
                    target.members.extend(absorbed.members);
                    if absorbed.min_id < target.min_id {
                        target.min_id = absorbed.min_id;
                    }
                    target.centroid = centroid_of(&target.members, &unit_vectors, dims);
                }
                _ => break,
            }
        }

        let mut themes = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            themes.push(self.build_theme(cluster, &ordered, &unit_vectors).await);
        }

        themes.sort_by(|a, b| {
            b.chunk_ids
                .len()
                .cmp(&a.chunk_ids.len())
                .then(b.avg_similarity.total_cmp(&a.avg_similarity))
                .then(a.label.cmp(&b.label))
        });
        themes.truncate(self.config.max_themes);

        tracing::debug!(inputs = inputs.len(), themes = themes.len(), "theme extraction complete");
        Ok(themes)
    }

    async fn build_theme(
        &self,
        cluster: &Cluster,
        ordered: &[&ThemeInput],
        unit_vectors: &[Vec<f32>],
    ) -> Theme {
        // Members ranked by closeness to the cluster centroid.
        let mut ranked: Vec<(usize, f32)> = cluster
            .members
            .iter()
            .map(|&m| (m, cosine_similarity(&unit_vectors[m], &cluster.centroid)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then(ordered[a.0].chunk_id.cmp(&ordered[b.0].chunk_id))
        });

        let avg_similarity = ranked.iter().map(|(_, s)| s).sum::<f32>() / ranked.len() as f32;
        let chunk_ids: Vec<String> = ranked
            .iter()
            .map(|(m, _)| ordered[*m].chunk_id.clone())
            .collect();

        let keywords = top_terms(
            cluster.members.iter().map(|&m| ordered[m].text.as_str()),
            self.config.max_keywords,
        );
        let label = if keywords.is_empty() {
            "unlabeled".to_string()
        } else {
            keywords[..keywords.len().min(3)].join(", ")
        };

        let mut doc_ids: Vec<&str> = cluster
            .members
            .iter()
            .map(|&m| ordered[m].document_id.as_str())
            .collect();
        doc_ids.sort_unstable();
        doc_ids.dedup();

        let description = match &self.summarizer {
            Some(generator) => {
                let texts: Vec<&str> = cluster
                    .members
                    .iter()
                    .map(|&m| ordered[m].text.as_str())
                    .collect();
                let prompt = format!(
                    "Summarize the shared topic of the following passages in one sentence.\n\n{}",
                    texts.join("\n---\n")
                );
                match generator.generate(&prompt).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "theme summarizer failed, using template");
                        template_description(cluster.members.len(), doc_ids.len(), &keywords)
                    }
                }
            }
            None => template_description(cluster.members.len(), doc_ids.len(), &keywords),
        };

        Theme {
            label,
            keywords,
            description,
            chunk_ids,
            avg_similarity,
        }
    }
}

fn pair_key<'a>(a: &'a Cluster, b: &'a Cluster) -> (&'a str, &'a str) {
    if a.min_id <= b.min_id {
        (&a.min_id, &b.min_id)
    } else {
        (&b.min_id, &a.min_id)
    }
}

fn centroid_of(members: &[usize], unit_vectors: &[Vec<f32>], dims: usize) -> Vec<f32> {
    let mut centroid = vec![0.0f32; dims];
    for &m in members {
        for (c, v) in centroid.iter_mut().zip(unit_vectors[m].iter()) {
            *c += v;
        }
    }
    for c in centroid.iter_mut() {
        *c /= members.len() as f32;
    }
    centroid
}

fn template_description(passages: usize, documents: usize, keywords: &[String]) -> String {
    if keywords.is_empty() {
        return format!("{} passages across {} documents.", passages, documents);
    }
    format!(
        "{} passages across {} documents covering {}.",
        passages,
        documents,
        keywords.join(", ")
    )
}

/// Most frequent non-stopword terms, ordered by (count desc, term asc).
fn top_terms<'a>(texts: impl Iterator<Item = &'a str>, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for token in tokenize(text) {
            if token.len() < 3 || STOPWORDS.contains(&token.as_str()) {
                continue;
            }
            *counts.entry(token).or_insert(0) += 1;
        }
    }
    let mut terms: Vec<(String, usize)> = counts.into_iter().collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    terms.truncate(limit);
    terms.into_iter().map(|(t, _)| t).collect()
}
