//! Answer assembly boundary.
//!
//! The core's responsibility ends at producing a well-formed,
//! citation-annotated context block; turning that context into prose is
//! the external text-generation collaborator's job, reached through the
//! [`TextGenerator`] trait.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{CoreError, ExternalError};
use crate::models::RetrievalResult;

/// Opaque text-generation capability (the external LLM call).
///
/// The core never implements this against a real network backend; tests
/// use deterministic fakes.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ExternalError>;
}

/// A generated answer together with the context it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledAnswer {
    pub answer: String,
    pub context: String,
    /// Locators in context order, e.g. `"document doc-a, chars 0-28"`.
    pub citations: Vec<String>,
}

/// Render retrieved chunks as a numbered, citation-annotated context block.
///
/// Each passage is tagged `[n]` and carries its source locator, so the
/// downstream collaborator (or UI) can cite verbatim.
pub fn build_context(result: &RetrievalResult) -> String {
    let mut out = String::new();
    for (n, hit) in result.hits.iter().enumerate() {
        out.push_str(&format!(
            "[{}] document {}, {}\n{}\n\n",
            n + 1,
            hit.citation.document_id,
            hit.citation.locator,
            hit.text
        ));
    }
    out
}

/// Forward the query and retrieval context to the external generator.
pub async fn assemble_answer(
    generator: &dyn TextGenerator,
    result: &RetrievalResult,
) -> Result<AssembledAnswer, CoreError> {
    let context = build_context(result);
    let prompt = format!(
        "Answer the question using only the numbered passages below. \
         Cite passages by their [n] tag.\n\nQuestion: {}\n\nPassages:\n{}",
        result.query, context
    );
    let answer = generator.generate(&prompt).await?;

    let citations = result
        .hits
        .iter()
        .map(|hit| format!("document {}, {}", hit.citation.document_id, hit.citation.locator))
        .collect();

    Ok(AssembledAnswer {
        answer,
        context,
        citations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Citation, RetrievedChunk};

    fn result() -> RetrievalResult {
        RetrievalResult {
            query: "Which animals are mammals?".to_string(),
            hits: vec![
                RetrievedChunk {
                    chunk_id: "doc-a#0".to_string(),
                    score: 0.9,
                    text: "Cats are mammals. Cats purr.".to_string(),
                    citation: Citation::new("doc-a", 0, 28, None),
                },
                RetrievedChunk {
                    chunk_id: "doc-b#0".to_string(),
                    score: 0.8,
                    text: "Dogs are mammals. Dogs bark.".to_string(),
                    citation: Citation::new("doc-b", 0, 28, Some(1)),
                },
            ],
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, ExternalError> {
            Ok(format!("echo: {} bytes", prompt.len()))
        }
    }

    #[test]
    fn context_numbers_passages_with_locators() {
        let context = build_context(&result());
        assert!(context.contains("[1] document doc-a, chars 0-28"));
        assert!(context.contains("[2] document doc-b, page 1, chars 0-28"));
        assert!(context.contains("Cats are mammals."));
        assert!(context.contains("Dogs are mammals."));
    }

    #[tokio::test]
    async fn assembled_answer_carries_citations() {
        let assembled = assemble_answer(&EchoGenerator, &result()).await.unwrap();
        assert!(assembled.answer.starts_with("echo:"));
        assert_eq!(assembled.citations.len(), 2);
        assert_eq!(assembled.citations[0], "document doc-a, chars 0-28");
        assert!(assembled.context.contains("[2]"));
    }
}
