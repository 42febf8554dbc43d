//! # PubRAG Retrieval
//!
//! Evidence selection for one query:
//! 1. [`Retriever`] — abstracts first, then body chunks constrained to the
//!    stage-1 candidates (or a global body search on fallback).
//! 2. [`Reranker`] — deterministic score adjustment by evidence tier,
//!    section and recency.
//! 3. [`DiversityFilter`] — caps chunks per document and trims to size.
//!
//! All three are pure functions of their inputs and the search results.

pub mod diversity;
pub mod rerank;
pub mod retriever;

pub use diversity::DiversityFilter;
pub use rerank::Reranker;
pub use retriever::{FallbackReason, Retrieval, RetrievalPath, Retriever};
