//! Domain types: conversation turns, literature records and ranked evidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat message role, as sent to the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Token accounting reported by the generation service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Raw completion returned by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Who authored a committed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One immutable entry of a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    /// Literature ids the turn points at (cited by the assistant, or
    /// referred back to by the user). Ordered, no duplicates.
    pub doc_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>, doc_ids: Vec<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            doc_ids: dedup_preserving_order(doc_ids),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, doc_ids: Vec<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            doc_ids: dedup_preserving_order(doc_ids),
            timestamp: Utc::now(),
        }
    }

    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::User => Message::user(&self.text),
            TurnRole::Assistant => Message::assistant(&self.text),
        }
    }
}

/// Bibliographic attributes shared by a document and all of its chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub publication_types: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub first_author: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
    /// Study population flags derived from the controlled vocabulary at
    /// ingestion; `None` when the record does not say.
    #[serde(default)]
    pub is_human: Option<bool>,
    #[serde(default)]
    pub is_animal: Option<bool>,
}

impl DocMeta {
    /// Author-year label used in citations, e.g. `Smith, 2022`.
    pub fn citation_label(&self) -> Option<String> {
        let author = self
            .first_author
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty() && !a.eq_ignore_ascii_case("unknown"));
        match (author, self.year) {
            (Some(a), Some(y)) => Some(format!("{a}, {y}")),
            (Some(a), None) => Some(a.to_string()),
            (None, Some(y)) => Some(y.to_string()),
            (None, None) => None,
        }
    }

    /// Fill fields this record lacks from another record of the same document.
    pub fn fill_missing_from(&mut self, other: &DocMeta) {
        if self.title.is_none() {
            self.title = other.title.clone();
        }
        if self.publication_types.is_empty() {
            self.publication_types = other.publication_types.clone();
        }
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.first_author.is_none() {
            self.first_author = other.first_author.clone();
        }
        if self.journal.is_none() {
            self.journal = other.journal.clone();
        }
        self.is_human = self.is_human.or(other.is_human);
        self.is_animal = self.is_animal.or(other.is_animal);
    }
}

/// A literature record from the abstract-level index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub abstract_text: String,
    pub meta: DocMeta,
    pub controlled_terms: Vec<String>,
}

/// A body passage. `doc_id` names its parent document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub section: Option<String>,
    pub text: String,
    pub meta: DocMeta,
}

/// One stage-1 hit: a document and its combined similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub doc_id: String,
    pub score: f32,
}

/// Ordered, duplicate-free documents surfaced by stage 1. Lives for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    entries: Vec<Candidate>,
}

impl CandidateSet {
    /// Build from hits already in rank order; later duplicates are dropped
    /// and at most `limit` documents are kept.
    pub fn from_ranked(hits: impl IntoIterator<Item = Candidate>, limit: usize) -> Self {
        let mut entries: Vec<Candidate> = Vec::new();
        for hit in hits {
            if entries.len() >= limit {
                break;
            }
            if entries.iter().any(|c| c.doc_id == hit.doc_id) {
                continue;
            }
            entries.push(hit);
        }
        Self { entries }
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.entries.iter().any(|c| c.doc_id == doc_id)
    }

    pub fn doc_ids(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.doc_id.clone()).collect()
    }

    pub fn entries(&self) -> &[Candidate] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A chunk with its raw similarity, adjusted score and current rank (0-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity: f32,
    pub adjusted_score: f32,
    pub rank: usize,
}

impl ScoredChunk {
    pub fn new(chunk: Chunk, similarity: f32, rank: usize) -> Self {
        Self { chunk, similarity, adjusted_score: similarity, rank }
    }

    pub fn doc_id(&self) -> &str {
        &self.chunk.doc_id
    }
}

/// A source attached to a synthesized answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    /// `Author, Year` when known, otherwise the doc id itself.
    pub label: String,
}

/// Inclusive publication-year bounds; either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub from: Option<i32>,
    pub to: Option<i32>,
}

impl YearRange {
    /// Oldest publication year accepted from payloads or filters.
    pub const EARLIEST: i32 = 1800;

    pub fn single(year: i32) -> Self {
        Self { from: Some(year), to: Some(year) }
    }

    /// Whether `year` could be a real publication year, given the current
    /// year (papers may be dated one year ahead).
    pub fn plausible(year: i32, current_year: i32) -> bool {
        (Self::EARLIEST..=current_year.saturating_add(1)).contains(&year)
    }

    pub fn contains(&self, year: i32) -> bool {
        self.from.is_none_or(|f| year >= f) && self.to.is_none_or(|t| year <= t)
    }
}

/// Evidence-quality tier of a publication, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceTier {
    MetaAnalysis,
    SystematicReview,
    Guideline,
    RandomizedControlledTrial,
    ClinicalTrial,
    Observational,
    Review,
    CaseReport,
    Unclassified,
}

impl EvidenceTier {
    /// All tiers, strongest first.
    pub const ORDERED: [EvidenceTier; 9] = [
        EvidenceTier::MetaAnalysis,
        EvidenceTier::SystematicReview,
        EvidenceTier::Guideline,
        EvidenceTier::RandomizedControlledTrial,
        EvidenceTier::ClinicalTrial,
        EvidenceTier::Observational,
        EvidenceTier::Review,
        EvidenceTier::CaseReport,
        EvidenceTier::Unclassified,
    ];

    /// Classify a single publication-type label (PubMed vocabulary).
    pub fn from_label(label: &str) -> Self {
        let l = label.to_lowercase();
        if l.contains("meta-analysis") || l.contains("meta analysis") {
            EvidenceTier::MetaAnalysis
        } else if l.contains("systematic review") {
            EvidenceTier::SystematicReview
        } else if l.contains("guideline") || l.contains("consensus") {
            EvidenceTier::Guideline
        } else if l.contains("randomized controlled trial") || l.contains("randomised controlled trial") {
            EvidenceTier::RandomizedControlledTrial
        } else if l.contains("clinical trial") {
            EvidenceTier::ClinicalTrial
        } else if l.contains("observational")
            || l.contains("comparative study")
            || l.contains("multicenter study")
            || l.contains("cohort")
        {
            EvidenceTier::Observational
        } else if l.contains("review") {
            EvidenceTier::Review
        } else if l.contains("case report") {
            EvidenceTier::CaseReport
        } else {
            EvidenceTier::Unclassified
        }
    }

    /// Strongest tier among a document's publication types.
    pub fn classify(labels: &[String]) -> Self {
        labels
            .iter()
            .map(|l| Self::from_label(l))
            .min()
            .unwrap_or(EvidenceTier::Unclassified)
    }
}

/// Coarse section class of a body chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Results,
    Conclusions,
    Discussion,
    Methods,
    Abstract,
    Introduction,
    Other,
}

impl SectionKind {
    pub fn classify(label: Option<&str>) -> Self {
        let Some(label) = label else {
            return SectionKind::Other;
        };
        let l = label.to_lowercase();
        if l.contains("result") || l.contains("finding") {
            SectionKind::Results
        } else if l.contains("conclusion") || l.contains("summary") {
            SectionKind::Conclusions
        } else if l.contains("discussion") {
            SectionKind::Discussion
        } else if l.contains("method") || l.contains("material") || l.contains("patients") {
            SectionKind::Methods
        } else if l.contains("abstract") {
            SectionKind::Abstract
        } else if l.contains("introduction") || l.contains("background") {
            SectionKind::Introduction
        } else {
            SectionKind::Other
        }
    }
}

/// Drop repeated ids, keeping first occurrences in order.
pub fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f32) -> Candidate {
        Candidate { doc_id: id.into(), score }
    }

    #[test]
    fn test_candidate_set_dedups_and_limits() {
        let set = CandidateSet::from_ranked(
            vec![candidate("P1", 0.9), candidate("P2", 0.8), candidate("P1", 0.7), candidate("P3", 0.6)],
            2,
        );
        assert_eq!(set.doc_ids(), vec!["P1", "P2"]);
        assert!(set.contains("P2"));
        assert!(!set.contains("P3"));
    }

    #[test]
    fn test_citation_label_degrades() {
        let mut meta = DocMeta {
            first_author: Some("Smith".into()),
            year: Some(2022),
            ..Default::default()
        };
        assert_eq!(meta.citation_label().as_deref(), Some("Smith, 2022"));
        meta.year = None;
        assert_eq!(meta.citation_label().as_deref(), Some("Smith"));
        meta.first_author = Some("Unknown".into());
        assert_eq!(meta.citation_label(), None);
    }

    #[test]
    fn test_evidence_tier_takes_strongest_label() {
        let labels = vec!["Journal Article".to_string(), "Randomized Controlled Trial".to_string()];
        assert_eq!(EvidenceTier::classify(&labels), EvidenceTier::RandomizedControlledTrial);
        assert_eq!(EvidenceTier::from_label("Practice Guideline"), EvidenceTier::Guideline);
        assert_eq!(EvidenceTier::from_label("Systematic Review"), EvidenceTier::SystematicReview);
        assert_eq!(EvidenceTier::from_label("Case Reports"), EvidenceTier::CaseReport);
        assert_eq!(EvidenceTier::classify(&[]), EvidenceTier::Unclassified);
    }

    #[test]
    fn test_section_classification() {
        assert_eq!(SectionKind::classify(Some("3. Results")), SectionKind::Results);
        assert_eq!(SectionKind::classify(Some("Conclusions")), SectionKind::Conclusions);
        assert_eq!(SectionKind::classify(Some("Background")), SectionKind::Introduction);
        assert_eq!(SectionKind::classify(None), SectionKind::Other);
    }

    #[test]
    fn test_year_range_open_bounds() {
        let r = YearRange { from: Some(2019), to: None };
        assert!(r.contains(2024));
        assert!(!r.contains(2018));
        assert!(YearRange::single(2020).contains(2020));
    }

    #[test]
    fn test_plausible_years() {
        assert!(YearRange::plausible(1800, 2025));
        assert!(YearRange::plausible(2026, 2025));
        assert!(!YearRange::plausible(2027, 2025));
        assert!(!YearRange::plausible(1799, 2025));
        assert!(!YearRange::plausible(i32::MIN, 2025));
    }

    #[test]
    fn test_turn_dedups_doc_ids() {
        let t = Turn::assistant("x", vec!["1".into(), "2".into(), "1".into()]);
        assert_eq!(t.doc_ids, vec!["1", "2"]);
        assert_eq!(t.to_message().role, Role::Assistant);
    }
}
