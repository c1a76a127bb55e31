//! # Corpus Engine
//!
//! Retrieval core for a document research assistant.
//!
//! Corpus Engine turns a session's uploaded documents (as extracted plain
//! text) into an addressable, searchable corpus: it chunks text with
//! stable offset provenance, embeds and indexes the chunks for cosine
//! similarity search, answers queries with citation-annotated results,
//! and groups chunk sets into cross-document themes.
//!
//! ## Architecture
//!
//! ```text
//! document text ──▶ chunker ──▶ chunks ──▶ embedder ──▶ vectors ──▶ index
//!                                              ▲                      │
//!                                              │                      ▼
//!                               query ─────────┘               retriever
//!                                                              │        │
//!                                                              ▼        ▼
//!                                                         themes   assemble
//! ```
//!
//! The web UI, file upload, OCR, and the final language-model answer call
//! are external collaborators: text comes in through
//! [`corpus::DocumentSource`], prose goes out through the
//! [`assemble::TextGenerator`] boundary.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corpus_engine::config::Config;
//! use corpus_engine::corpus::{Corpus, DocumentSource};
//! use corpus_engine::models::DocumentFormat;
//!
//! # async fn run() -> Result<(), corpus_engine::error::CoreError> {
//! let corpus = Corpus::new(Config::default())?;
//! corpus
//!     .ingest(
//!         DocumentSource {
//!             id: Some("notes".into()),
//!             title: Some("Field notes".into()),
//!             format: DocumentFormat::Text,
//!             text: "Cats are mammals. Cats purr.".into(),
//!         },
//!         None,
//!     )
//!     .await?;
//! let result = corpus.retrieve("Which animals are mammals?", 5, None).await?;
//! let themes = corpus.result_themes(&result).await?;
//! # let _ = themes;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with validation |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`chunker`] | Boundary-aware overlapping text chunking |
//! | [`embedding`] | Embedder capability interface and providers |
//! | [`index`] | Brute-force cosine vector index with snapshots |
//! | [`retriever`] | Query retrieval with thresholding and citations |
//! | [`themes`] | Deterministic theme clustering |
//! | [`assemble`] | Citation-annotated answer context |
//! | [`corpus`] | Session facade and ingestion pipeline |

pub mod assemble;
pub mod chunker;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod retriever;
pub mod themes;
