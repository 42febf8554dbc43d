//! Per-document cap on the final evidence set.

use std::collections::HashMap;

use pubrag_core::config::RetrievalConfig;
use pubrag_core::types::ScoredChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiversityFilter {
    /// Most chunks any one document may contribute.
    pub max_per_doc: usize,
    /// Stop once this many chunks are kept.
    pub target: usize,
}

impl DiversityFilter {
    pub fn new(max_per_doc: usize, target: usize) -> Self {
        Self { max_per_doc, target }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.max_chunks_per_doc, config.target_return_size)
    }

    /// Walk `ranked` in order, keeping a chunk only while its document is
    /// under the cap. Kept chunks retain their relative order.
    pub fn apply(&self, ranked: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let mut per_doc: HashMap<String, usize> = HashMap::new();
        let mut kept = Vec::with_capacity(self.target.min(ranked.len()));
        let total = ranked.len();

        for chunk in ranked {
            if kept.len() >= self.target {
                break;
            }
            let count = per_doc.entry(chunk.doc_id().to_string()).or_insert(0);
            if *count >= self.max_per_doc {
                continue;
            }
            *count += 1;
            kept.push(chunk);
        }

        tracing::debug!(
            "diversity: kept {} of {} chunks from {} documents",
            kept.len(),
            total,
            per_doc.values().filter(|n| **n > 0).count()
        );
        kept
    }
}
