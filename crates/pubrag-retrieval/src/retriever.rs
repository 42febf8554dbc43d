//! Two-stage hybrid retrieval.
//!
//! Stage 1 queries the abstract collection and yields the candidate set.
//! Stage 2 queries the body collection restricted to those candidates. When
//! stage 1 comes back empty (or fails), or the caller asks for a second
//! attempt, stage 2 runs over the whole body collection instead.

use std::collections::HashMap;
use std::sync::Arc;

use pubrag_core::call::{CallPolicy, bounded};
use pubrag_core::config::RetrievalConfig;
use pubrag_core::error::Result;
use pubrag_core::traits::search::{
    Collection, IndexRecord, SearchFilter, SearchHit, SearchRequest, VectorSearch,
};
use pubrag_core::types::{Candidate, CandidateSet, DocMeta, Document, ScoredChunk};
use serde::{Deserialize, Serialize};

/// Why stage 2 ran unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Stage 1 found no documents.
    EmptyCandidates,
    /// Stage 1 could not be completed.
    Stage1Failed,
    /// The caller asked for a second attempt.
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "path", content = "reason")]
pub enum RetrievalPath {
    Constrained,
    Fallback(FallbackReason),
}

impl RetrievalPath {
    pub fn is_fallback(&self) -> bool {
        matches!(self, RetrievalPath::Fallback(_))
    }
}

/// Outcome of one retrieval.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub candidates: CandidateSet,
    /// Stage-1 documents in candidate order; empty on the fallback path.
    pub documents: Vec<Document>,
    /// Ranked by descending similarity, ties by ascending doc id.
    pub chunks: Vec<ScoredChunk>,
    pub path: RetrievalPath,
}

pub struct Retriever {
    search: Arc<dyn VectorSearch>,
    config: RetrievalConfig,
    policy: CallPolicy,
}

impl Retriever {
    pub fn new(search: Arc<dyn VectorSearch>, config: RetrievalConfig, policy: CallPolicy) -> Self {
        Self { search, config, policy }
    }

    /// Run both stages. Never fails: service faults degrade to the fallback
    /// path or to an empty chunk list.
    pub async fn retrieve(&self, query: &str, filter: &SearchFilter, force_fallback: bool) -> Retrieval {
        if force_fallback {
            tracing::warn!("⚠️ retriever: fallback requested, skipping candidate constraint");
            return self.fallback(query, CandidateSet::default(), FallbackReason::Requested).await;
        }

        let (candidates, documents) = match self.stage1(query, filter).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("⚠️ retriever: stage 1 failed ({e}), using global body search");
                return self
                    .fallback(query, CandidateSet::default(), FallbackReason::Stage1Failed)
                    .await;
            }
        };

        if candidates.is_empty() {
            tracing::warn!("⚠️ retriever: stage 1 found no documents, using global body search");
            return self.fallback(query, candidates, FallbackReason::EmptyCandidates).await;
        }

        let mut chunks = match self.stage2(query, Some(&candidates)).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!("⚠️ retriever: stage 2 failed ({e}), no chunks this turn");
                Vec::new()
            }
        };
        let metas: HashMap<&str, &DocMeta> = documents.iter().map(|d| (d.doc_id.as_str(), &d.meta)).collect();
        for c in &mut chunks {
            if let Some(meta) = metas.get(c.chunk.doc_id.as_str()) {
                c.chunk.meta.fill_missing_from(meta);
            }
        }
        tracing::info!(
            "🔎 retrieved {} chunks from {} candidate documents",
            chunks.len(),
            candidates.len()
        );
        Retrieval {
            candidates,
            documents,
            chunks,
            path: RetrievalPath::Constrained,
        }
    }

    async fn fallback(&self, query: &str, candidates: CandidateSet, reason: FallbackReason) -> Retrieval {
        let chunks = match self.stage2(query, None).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!("⚠️ retriever: global body search failed ({e})");
                Vec::new()
            }
        };
        tracing::info!("🔎 fallback retrieval ({reason:?}): {} chunks", chunks.len());
        Retrieval {
            candidates,
            documents: Vec::new(),
            chunks,
            path: RetrievalPath::Fallback(reason),
        }
    }

    /// Abstract-level search. Over-fetches `2 × K1` hits and keeps the first
    /// `K1` distinct documents, returned alongside their abstract records. A
    /// filter the service rejects is dropped and the search repeated once
    /// without it.
    pub async fn stage1(&self, query: &str, filter: &SearchFilter) -> Result<(CandidateSet, Vec<Document>)> {
        let limit = self.config.abstract_top_n.saturating_mul(2);
        let hits = match self.query(Collection::Abstracts, query, filter.clone(), limit).await {
            Ok(hits) => hits,
            Err(e) if !e.is_transient() && !filter.is_empty() => {
                tracing::warn!("⚠️ retriever: filter rejected ({e}), retrying stage 1 unfiltered");
                self.query(Collection::Abstracts, query, SearchFilter::default(), limit)
                    .await?
            }
            Err(e) => return Err(e),
        };

        let hits = sort_hits(hits);
        let candidates = CandidateSet::from_ranked(
            hits.iter().map(|h| Candidate {
                doc_id: h.record.doc_id.clone(),
                score: h.score,
            }),
            self.config.abstract_top_n,
        );
        let mut first_hit: HashMap<String, IndexRecord> = HashMap::new();
        for h in hits {
            first_hit.entry(h.record.doc_id.clone()).or_insert(h.record);
        }
        let documents = candidates
            .entries()
            .iter()
            .filter_map(|c| first_hit.remove(&c.doc_id))
            .map(IndexRecord::into_document)
            .collect();
        tracing::debug!("stage 1: {} candidates", candidates.len());
        Ok((candidates, documents))
    }

    /// Body-chunk search, restricted to `candidates` when given.
    pub async fn stage2(&self, query: &str, candidates: Option<&CandidateSet>) -> Result<Vec<ScoredChunk>> {
        let filter = match candidates {
            Some(set) => SearchFilter::doc_ids(set.doc_ids()),
            None => SearchFilter::default(),
        };
        let hits = self
            .query(Collection::Bodies, query, filter, self.config.chunk_top_k)
            .await?;

        let mut hits = sort_hits(hits);
        if let Some(set) = candidates {
            let before = hits.len();
            hits.retain(|h| set.contains(&h.record.doc_id));
            if hits.len() < before {
                tracing::warn!(
                    "⚠️ retriever: dropped {} stage-2 chunks outside the candidate set",
                    before - hits.len()
                );
            }
        }
        hits.truncate(self.config.chunk_top_k);

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(rank, h)| ScoredChunk::new(h.record.into_chunk(), h.score, rank))
            .collect())
    }

    async fn query(
        &self,
        collection: Collection,
        text: &str,
        filter: SearchFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let request = SearchRequest {
            text: text.to_string(),
            filter,
            limit,
        };
        let operation = format!("{collection} search");
        bounded(&operation, &self.policy, || self.search.query(collection, &request)).await
    }
}

/// Descending score, ties by ascending doc id then hit id.
fn sort_hits(mut hits: Vec<SearchHit>) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.record.doc_id.cmp(&b.record.doc_id))
            .then_with(|| a.id.cmp(&b.id))
    });
    hits
}
