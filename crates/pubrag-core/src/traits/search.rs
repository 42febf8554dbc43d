//! Vector search service trait and its request/response model.
//!
//! The service exposes two logical collections: abstracts (one record per
//! document) and bodies (many section-labelled chunks per document). Each
//! accepts a hybrid text query plus an optional metadata predicate.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::{Chunk, DocMeta, Document, YearRange};

/// Logical collection of the two-tier index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Abstracts,
    Bodies,
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collection::Abstracts => write!(f, "abstracts"),
            Collection::Bodies => write!(f, "bodies"),
        }
    }
}

/// Metadata predicate. Empty fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default)]
    pub doc_ids: Vec<String>,
    #[serde(default)]
    pub year_range: Option<YearRange>,
    #[serde(default)]
    pub first_author: Option<String>,
    #[serde(default)]
    pub publication_types: Vec<String>,
    #[serde(default)]
    pub journal: Option<String>,
    /// Major controlled-vocabulary (MeSH) terms; any one suffices.
    #[serde(default)]
    pub controlled_terms: Vec<String>,
    #[serde(default)]
    pub is_human: Option<bool>,
    #[serde(default)]
    pub is_animal: Option<bool>,
}

impl SearchFilter {
    pub fn doc_ids(ids: Vec<String>) -> Self {
        Self { doc_ids: ids, ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
            && self.year_range.is_none()
            && self.first_author.is_none()
            && self.publication_types.is_empty()
            && self.journal.is_none()
            && self.controlled_terms.is_empty()
            && self.is_human.is_none()
            && self.is_animal.is_none()
    }

    /// Whether a record satisfies every populated condition.
    pub fn matches(&self, record: &IndexRecord) -> bool {
        if !self.doc_ids.is_empty() && !self.doc_ids.contains(&record.doc_id) {
            return false;
        }
        if let Some(range) = &self.year_range {
            match record.meta.year {
                Some(y) if range.contains(y) => {}
                _ => return false,
            }
        }
        if let Some(author) = &self.first_author {
            let matches_author = record
                .meta
                .first_author
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(author));
            if !matches_author {
                return false;
            }
        }
        if !self.publication_types.is_empty() && !any_shared(&self.publication_types, &record.meta.publication_types) {
            return false;
        }
        if let Some(journal) = &self.journal {
            let same = record
                .meta
                .journal
                .as_deref()
                .is_some_and(|j| j.trim().eq_ignore_ascii_case(journal.trim()));
            if !same {
                return false;
            }
        }
        if !self.controlled_terms.is_empty() && !any_shared(&self.controlled_terms, &record.controlled_terms) {
            return false;
        }
        // A record that does not state its population never matches a flag.
        if self.is_human.is_some() && record.meta.is_human != self.is_human {
            return false;
        }
        if self.is_animal.is_some() && record.meta.is_animal != self.is_animal {
            return false;
        }
        true
    }
}

fn any_shared(wanted: &[String], present: &[String]) -> bool {
    present
        .iter()
        .any(|p| wanted.iter().any(|w| p.eq_ignore_ascii_case(w)))
}

/// A hybrid query against one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub text: String,
    pub filter: SearchFilter,
    pub limit: usize,
}

/// A record as stored by the ingestion pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub doc_id: String,
    pub text: String,
    /// Section label; body records only.
    #[serde(default)]
    pub section: Option<String>,
    #[serde(flatten)]
    pub meta: DocMeta,
    #[serde(default)]
    pub controlled_terms: Vec<String>,
}

impl IndexRecord {
    /// Read a record from a stored payload. Canonical field names are
    /// preferred; the legacy names written by older ingestion runs
    /// (`pmid`, `page_content`, `pub_year`, ...) are accepted too, at the top
    /// level or nested under `metadata`.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let field = |names: &[&str]| lookup(payload, names);

        let doc_id = field(&["doc_id", "pmid"]).and_then(value_to_string)?;
        let text = field(&["text", "page_content", "content"])
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Some(Self {
            doc_id,
            text,
            section: field(&["section", "Header 2", "header_2"])
                .and_then(Value::as_str)
                .map(String::from),
            meta: DocMeta {
                title: field(&["title", "article_title"]).and_then(Value::as_str).map(String::from),
                publication_types: field(&["publication_type", "publication_types"])
                    .map(value_to_list)
                    .unwrap_or_default(),
                year: field(&["year", "pub_year", "publication_year"]).and_then(value_to_year),
                first_author: field(&["first_author", "first_author_lastname"])
                    .and_then(Value::as_str)
                    .map(String::from)
                    .filter(|a| !a.eq_ignore_ascii_case("unknown")),
                journal: field(&["journal", "journal_name"])
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|j| !j.is_empty())
                    .map(String::from),
                is_human: field(&["is_human"]).and_then(value_to_bool),
                is_animal: field(&["is_animal"]).and_then(value_to_bool),
            },
            controlled_terms: field(&["controlled_vocabulary_terms", "controlled_terms", "mesh_major_terms"])
                .map(value_to_list)
                .unwrap_or_default(),
        })
    }

    pub fn into_document(self) -> Document {
        Document {
            doc_id: self.doc_id,
            abstract_text: self.text,
            meta: self.meta,
            controlled_terms: self.controlled_terms,
        }
    }

    pub fn into_chunk(self) -> Chunk {
        Chunk {
            doc_id: self.doc_id,
            section: self.section,
            text: self.text,
            meta: self.meta,
        }
    }
}

fn lookup<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a Value> {
    let nested = payload.get("metadata");
    names
        .iter()
        .find_map(|n| payload.get(*n).filter(|v| !v.is_null()))
        .or_else(|| {
            let nested = nested?;
            names.iter().find_map(|n| nested.get(*n).filter(|v| !v.is_null()))
        })
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_u64().filter(|n| *n <= 1).map(|n| n == 1),
        _ => None,
    }
}

/// Out-of-range or implausible years read as unknown.
fn value_to_year(v: &Value) -> Option<i32> {
    let year = match v {
        Value::Number(n) => i32::try_from(n.as_i64()?).ok()?,
        Value::String(s) => s.trim().parse::<i32>().ok()?,
        _ => return None,
    };
    YearRange::plausible(year, Utc::now().year()).then_some(year)
}

/// Lists may be stored as arrays or as a stringified Python-style list.
fn value_to_list(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items.iter().filter_map(value_to_string).collect(),
        Value::String(s) => s
            .trim_matches(|c: char| c == '[' || c == ']')
            .split(',')
            .map(|p| p.trim().trim_matches(|c: char| c == '\'' || c == '"').to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// One ranked result from a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub record: IndexRecord,
}

/// Hybrid (dense + lexical) nearest-neighbor search over the two-tier index.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    fn name(&self) -> &str;

    /// Results ordered by descending combined similarity.
    async fn query(&self, collection: Collection, request: &SearchRequest) -> Result<Vec<SearchHit>>;

    async fn health_check(&self) -> Result<bool>;
}
