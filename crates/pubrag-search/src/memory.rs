//! In-process hybrid index.
//!
//! Records are loaded from a JSONL corpus (one payload per line, tagged with
//! the collection it belongs to). Scoring mixes a term-frequency cosine
//! (stand-in for the dense signal) with query-term overlap (the lexical
//! signal), so results are fully deterministic.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use pubrag_core::config::SearchConfig;
use pubrag_core::error::{PubragError, Result};
use pubrag_core::traits::search::{
    Collection, IndexRecord, SearchHit, SearchRequest, VectorSearch,
};
use serde_json::Value;

struct Entry {
    id: String,
    record: IndexRecord,
    terms: BTreeMap<String, f32>,
}

pub struct MemoryIndex {
    abstracts: Vec<Entry>,
    bodies: Vec<Entry>,
    vector_weight: f32,
    keyword_weight: f32,
}

impl MemoryIndex {
    pub fn new(vector_weight: f32, keyword_weight: f32) -> Self {
        Self {
            abstracts: Vec::new(),
            bodies: Vec::new(),
            vector_weight,
            keyword_weight,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.vector_weight, config.keyword_weight)
    }

    /// Load a JSONL corpus. Each line is a record payload with a
    /// `collection` tag (`abstracts`/`bodies`, or the configured collection
    /// names). Unreadable lines are skipped with a warning.
    pub fn load_jsonl(path: &Path, config: &SearchConfig) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PubragError::Config(format!("Failed to read corpus {}: {e}", path.display()))
        })?;
        let mut index = Self::from_config(config);
        let mut skipped = 0usize;

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|v| {
                    let collection = parse_collection(v.get("collection")?.as_str()?, config)?;
                    Some((collection, IndexRecord::from_payload(&v)?))
                });
            match parsed {
                Some((collection, record)) => index.insert(collection, record),
                None => {
                    skipped += 1;
                    tracing::debug!("corpus line {} skipped", lineno + 1);
                }
            }
        }
        if skipped > 0 {
            tracing::warn!("⚠️ {skipped} corpus lines skipped in {}", path.display());
        }
        Ok(index)
    }

    pub fn insert(&mut self, collection: Collection, record: IndexRecord) {
        let entries = match collection {
            Collection::Abstracts => &mut self.abstracts,
            Collection::Bodies => &mut self.bodies,
        };
        let id = format!("{}#{}", record.doc_id, entries.len());
        let mut indexed_text = record.text.clone();
        if let Some(title) = &record.meta.title {
            indexed_text.push(' ');
            indexed_text.push_str(title);
        }
        for term in &record.controlled_terms {
            indexed_text.push(' ');
            indexed_text.push_str(term);
        }
        let terms = term_frequencies(&indexed_text);
        entries.push(Entry { id, record, terms });
    }

    /// Builder-style insert, handy for fixtures.
    pub fn with(mut self, collection: Collection, record: IndexRecord) -> Self {
        self.insert(collection, record);
        self
    }

    pub fn len(&self, collection: Collection) -> usize {
        match collection {
            Collection::Abstracts => self.abstracts.len(),
            Collection::Bodies => self.bodies.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.abstracts.is_empty() && self.bodies.is_empty()
    }

    fn score(&self, query: &BTreeMap<String, f32>, entry: &Entry) -> f32 {
        let cosine = cosine_similarity(query, &entry.terms);
        let overlap = if query.is_empty() {
            0.0
        } else {
            let shared = query.keys().filter(|t| entry.terms.contains_key(*t)).count();
            shared as f32 / query.len() as f32
        };
        self.vector_weight * cosine + self.keyword_weight * overlap
    }
}

fn parse_collection(tag: &str, config: &SearchConfig) -> Option<Collection> {
    match tag {
        "abstracts" | "abstract" => Some(Collection::Abstracts),
        "bodies" | "body" | "chunks" => Some(Collection::Bodies),
        t if t == config.abstract_collection => Some(Collection::Abstracts),
        t if t == config.body_collection => Some(Collection::Bodies),
        _ => None,
    }
}

/// Lowercased alphanumeric tokens of two or more characters.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
}

fn term_frequencies(text: &str) -> BTreeMap<String, f32> {
    let mut tf = BTreeMap::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    tf
}

fn cosine_similarity(a: &BTreeMap<String, f32>, b: &BTreeMap<String, f32>) -> f32 {
    let dot: f32 = a
        .iter()
        .filter_map(|(t, x)| b.get(t).map(|y| x * y))
        .sum();
    let norm_a: f32 = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorSearch for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query(&self, collection: Collection, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let entries = match collection {
            Collection::Abstracts => &self.abstracts,
            Collection::Bodies => &self.bodies,
        };
        let query = term_frequencies(&request.text);

        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter(|e| request.filter.matches(&e.record))
            .filter_map(|e| {
                let score = self.score(&query, e);
                (score > 0.0).then(|| SearchHit {
                    id: e.id.clone(),
                    score,
                    record: e.record.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record.doc_id.cmp(&b.record.doc_id))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.is_empty())
    }
}
