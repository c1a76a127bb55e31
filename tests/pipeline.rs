//! End-to-end pipeline scenarios over the deterministic hash embedder.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use corpus_engine::assemble::{assemble_answer, build_context, TextGenerator};
use corpus_engine::chunker::{chunk_document, rejoin};
use corpus_engine::config::{ChunkingConfig, Config};
use corpus_engine::corpus::{Corpus, DocumentSource};
use corpus_engine::error::{CoreError, ExternalError};
use corpus_engine::index::VectorIndex;
use corpus_engine::models::DocumentFormat;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn source(id: &str, format: DocumentFormat, text: &str) -> DocumentSource {
    DocumentSource {
        id: Some(id.to_string()),
        title: Some(id.to_string()),
        format,
        text: text.to_string(),
    }
}

async fn animal_corpus() -> Corpus {
    init_logging();
    let corpus = Corpus::new(Config::default()).unwrap();
    corpus
        .ingest(
            source("doc-a", DocumentFormat::Text, "Cats are mammals. Cats purr."),
            None,
        )
        .await
        .unwrap();
    corpus
        .ingest(
            source("doc-b", DocumentFormat::Text, "Dogs are mammals. Dogs bark."),
            None,
        )
        .await
        .unwrap();
    corpus
}

#[tokio::test]
async fn two_document_question_cites_both_sources() {
    let corpus = animal_corpus().await;

    let result = corpus
        .retrieve("Which animals are mammals?", 2, None)
        .await
        .unwrap();

    assert_eq!(result.hits.len(), 2);
    let cited: HashSet<&str> = result
        .hits
        .iter()
        .map(|h| h.citation.document_id.as_str())
        .collect();
    assert!(cited.contains("doc-a"));
    assert!(cited.contains("doc-b"));
    for hit in &result.hits {
        assert!(hit.score > 0.25);
        assert!(!hit.citation.locator.is_empty());
    }
}

#[tokio::test]
async fn themes_on_result_cover_shared_concept() {
    let corpus = animal_corpus().await;
    let result = corpus
        .retrieve("Which animals are mammals?", 2, None)
        .await
        .unwrap();

    let themes = corpus.result_themes(&result).await.unwrap();
    assert!(!themes.is_empty());

    let mammal_theme = &themes[0];
    assert!(mammal_theme.keywords.contains(&"mammals".to_string()));
    let docs: HashSet<&str> = mammal_theme
        .chunk_ids
        .iter()
        .map(|id| id.split('#').next().unwrap())
        .collect();
    assert!(docs.contains("doc-a") && docs.contains("doc-b"));
}

#[tokio::test]
async fn corpus_themes_match_result_themes_for_full_retrieval() {
    let corpus = animal_corpus().await;
    let whole = corpus.corpus_themes().await.unwrap();
    assert!(!whole.is_empty());
    assert_eq!(whole[0].chunk_ids.len(), 2);
}

#[tokio::test]
async fn irrelevant_query_reports_no_results() {
    let corpus = animal_corpus().await;
    let err = corpus
        .retrieve("quantum chromodynamics lattice", 3, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoResults { .. }));
}

#[tokio::test]
async fn document_filter_narrows_citations() {
    let corpus = animal_corpus().await;
    let only_a: HashSet<String> = ["doc-a".to_string()].into_iter().collect();
    let result = corpus
        .retrieve("Which animals are mammals?", 5, Some(&only_a))
        .await
        .unwrap();
    assert!(result
        .hits
        .iter()
        .all(|h| h.citation.document_id == "doc-a"));
}

struct CannedGenerator;

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, ExternalError> {
        Ok("Both cats and dogs are mammals [1][2].".to_string())
    }
}

#[tokio::test]
async fn assembled_answer_reuses_retrieval_citations() {
    let corpus = animal_corpus().await;
    let result = corpus
        .retrieve("Which animals are mammals?", 2, None)
        .await
        .unwrap();

    let context = build_context(&result);
    assert!(context.contains("[1] document "));
    assert!(context.contains("[2] document "));

    let assembled = assemble_answer(&CannedGenerator, &result).await.unwrap();
    assert_eq!(assembled.citations.len(), 2);
    assert!(assembled.answer.contains("mammals"));
}

#[tokio::test]
async fn snapshot_roundtrip_restores_search_behavior() {
    let corpus = animal_corpus().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.index.json");
    corpus.index().save_snapshot(&path).unwrap();

    let restored = VectorIndex::load_snapshot(&path).unwrap();
    assert_eq!(restored.len(), corpus.index().len());

    // Same query vector against both indexes must rank identically.
    let entry = corpus.index().get("doc-a#0").unwrap();
    let before = corpus.index().search(&entry.vector, 2, None).unwrap();
    let after = restored.search(&entry.vector, 2, None).unwrap();
    let a: Vec<_> = before.iter().map(|h| (h.chunk_id.clone(), h.score)).collect();
    let b: Vec<_> = after.iter().map(|h| (h.chunk_id.clone(), h.score)).collect();
    assert_eq!(a, b);
}

#[tokio::test]
async fn multi_page_scanned_document_carries_page_citations() {
    let page_one = "Introduction to renewable energy systems. ".repeat(8);
    let page_two = "Solar capacity grew steadily last decade. ".repeat(8);
    let text = format!("{}\n\n\x0C{}", page_one, page_two);

    let mut config = Config::default();
    config.chunking.max_chunk_size = 200;
    config.chunking.overlap_size = 0;
    let corpus = Corpus::new(config).unwrap();
    corpus
        .ingest(source("scan-1", DocumentFormat::Image, &text), None)
        .await
        .unwrap();

    let result = corpus
        .retrieve("How did solar capacity grow?", 3, None)
        .await
        .unwrap();
    assert!(!result.hits.is_empty());
    let best = &result.hits[0];
    assert_eq!(best.citation.page, Some(2));
    assert!(best.citation.locator.starts_with("page 2"));
}

#[test]
fn chunk_round_trip_holds_for_long_mixed_text() {
    let text = format!(
        "{}\n\n{}\n\n{}",
        "A long opening section. It has several sentences. Each adds bytes. ".repeat(12),
        "Ünïcode médley ßection with multi-byte characters. ".repeat(9),
        "Closing remarks without trailing punctuation"
    );
    let config = ChunkingConfig {
        max_chunk_size: 160,
        overlap_size: 32,
    };
    let chunks = chunk_document("doc", &text, &config).unwrap();
    assert!(chunks.len() > 3);
    for chunk in &chunks {
        assert!(chunk.text.len() <= 160);
    }
    assert_eq!(rejoin(&chunks), text);
}

#[tokio::test]
async fn reingest_after_remove_is_clean() {
    let corpus = animal_corpus().await;
    corpus.remove_document("doc-a").unwrap();
    corpus
        .ingest(
            source("doc-a", DocumentFormat::Text, "Cats are mammals. Cats meow."),
            None,
        )
        .await
        .unwrap();

    let result = corpus
        .retrieve("Which animals are mammals?", 2, None)
        .await
        .unwrap();
    assert_eq!(result.hits.len(), 2);
    let doc_a_hit = result
        .hits
        .iter()
        .find(|h| h.citation.document_id == "doc-a")
        .unwrap();
    assert!(doc_a_hit.text.contains("meow"));
}
