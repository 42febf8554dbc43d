//! # PubRAG Search
//!
//! Clients for the two-tier literature index: a Qdrant hybrid-query client
//! for production and an in-process index for offline use and tests.

pub mod memory;
pub mod qdrant;

pub use memory::MemoryIndex;
pub use qdrant::QdrantSearch;

use pubrag_core::config::SearchConfig;
use pubrag_core::error::{PubragError, Result};
use pubrag_core::traits::VectorSearch;

/// Create the search backend named by `search.backend`.
pub fn create_search(config: &SearchConfig) -> Result<Box<dyn VectorSearch>> {
    match config.backend.as_str() {
        "qdrant" => Ok(Box::new(QdrantSearch::new(config)?)),
        "memory" => {
            let path = shellexpand::tilde(&config.corpus_path).to_string();
            let index = MemoryIndex::load_jsonl(std::path::Path::new(&path), config)?;
            tracing::info!(
                "📦 Memory index loaded from {path}: {} abstracts, {} chunks",
                index.len(pubrag_core::traits::Collection::Abstracts),
                index.len(pubrag_core::traits::Collection::Bodies)
            );
            Ok(Box::new(index))
        }
        other => Err(PubragError::Config(format!(
            "Unknown search backend '{other}' (expected qdrant or memory)"
        ))),
    }
}
