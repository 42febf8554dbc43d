//! PubRAG configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::call::CallPolicy;
use crate::error::{PubragError, Result};
use crate::types::{EvidenceTier, SectionKind};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubragConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Abbreviation → expansion, used when the query parser degrades.
    #[serde(default = "default_glossary")]
    pub glossary: BTreeMap<String, String>,
}

impl Default for PubragConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            retrieval: RetrievalConfig::default(),
            rerank: RerankConfig::default(),
            session: SessionConfig::default(),
            synthesis: SynthesisConfig::default(),
            timeouts: TimeoutConfig::default(),
            glossary: default_glossary(),
        }
    }
}

impl PubragConfig {
    /// Load config from the default path (~/.pubrag/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PubragError::Config(format!("Failed to read config: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| PubragError::Config(format!("Failed to parse config: {e}")))?;
        config.normalize();
        Ok(config)
    }

    /// Serialize the effective configuration.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PubragError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the PubRAG home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pubrag")
    }

    /// Problems that make parts of the configuration unusable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        problems.extend(self.rerank.evidence.problems());
        problems.extend(self.rerank.sections.problems());
        problems.extend(self.rerank.recency.problems());
        if self.retrieval.abstract_top_n == 0 {
            problems.push("retrieval.abstract_top_n must be at least 1".into());
        }
        if self.retrieval.chunk_top_k == 0 {
            problems.push("retrieval.chunk_top_k must be at least 1".into());
        }
        if self.retrieval.max_chunks_per_doc == 0 {
            problems.push("retrieval.max_chunks_per_doc must be at least 1".into());
        }
        if self.retrieval.target_return_size == 0 {
            problems.push("retrieval.target_return_size must be at least 1".into());
        }
        problems
    }

    /// Replace unusable values with defaults, logging each replacement.
    pub fn normalize(&mut self) {
        if !self.rerank.evidence.problems().is_empty() {
            tracing::warn!("⚠️ rerank.evidence weights are negative or non-monotonic, using defaults");
            self.rerank.evidence = EvidenceWeights::default();
        }
        if !self.rerank.sections.problems().is_empty() {
            tracing::warn!("⚠️ rerank.sections weights are invalid, using defaults");
            self.rerank.sections = SectionWeights::default();
        }
        if !self.rerank.recency.problems().is_empty() {
            tracing::warn!("⚠️ rerank.recency is invalid, using defaults");
            self.rerank.recency = RecencyConfig::default();
        }
        let defaults = RetrievalConfig::default();
        let r = &mut self.retrieval;
        for (value, default, name) in [
            (&mut r.abstract_top_n, defaults.abstract_top_n, "abstract_top_n"),
            (&mut r.chunk_top_k, defaults.chunk_top_k, "chunk_top_k"),
            (&mut r.max_chunks_per_doc, defaults.max_chunks_per_doc, "max_chunks_per_doc"),
            (&mut r.target_return_size, defaults.target_return_size, "target_return_size"),
        ] {
            if *value == 0 {
                tracing::warn!("⚠️ retrieval.{name} is 0, using {default}");
                *value = default;
            }
        }
    }
}

/// Generation service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's registry base URL.
    #[serde(default)]
    pub endpoint: String,
    /// Providers tried in order when the primary fails.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String { "openai".into() }
fn default_model() -> String { "gpt-4o-mini".into() }
fn default_max_tokens() -> u32 { 1024 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            endpoint: String::new(),
            fallbacks: Vec::new(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Vector search service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// `qdrant` or `memory`.
    #[serde(default = "default_search_backend")]
    pub backend: String,
    #[serde(default = "default_search_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_abstract_collection")]
    pub abstract_collection: String,
    #[serde(default = "default_body_collection")]
    pub body_collection: String,
    #[serde(default = "default_dense_vector")]
    pub dense_vector: String,
    #[serde(default = "default_dense_model")]
    pub dense_model: String,
    #[serde(default = "default_sparse_vector")]
    pub sparse_vector: String,
    #[serde(default = "default_sparse_model")]
    pub sparse_model: String,
    #[serde(default)]
    pub fields: FilterFields,
    /// JSONL corpus for the `memory` backend.
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
}

fn default_search_backend() -> String { "qdrant".into() }
fn default_search_url() -> String { "http://localhost:6333".into() }
fn default_abstract_collection() -> String { "abstract_index".into() }
fn default_body_collection() -> String { "body_index".into() }
fn default_dense_vector() -> String { "dense".into() }
fn default_dense_model() -> String { "sentence-transformers/all-minilm-l6-v2".into() }
fn default_sparse_vector() -> String { "bm25".into() }
fn default_sparse_model() -> String { "qdrant/bm25".into() }
fn default_corpus_path() -> String { "~/.pubrag/corpus.jsonl".into() }
fn default_vector_weight() -> f32 { 0.7 }
fn default_keyword_weight() -> f32 { 0.3 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: default_search_backend(),
            url: default_search_url(),
            api_key: String::new(),
            abstract_collection: default_abstract_collection(),
            body_collection: default_body_collection(),
            dense_vector: default_dense_vector(),
            dense_model: default_dense_model(),
            sparse_vector: default_sparse_vector(),
            sparse_model: default_sparse_model(),
            fields: FilterFields::default(),
            corpus_path: default_corpus_path(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
        }
    }
}

/// Payload paths used when translating filters for the search service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterFields {
    #[serde(default = "default_doc_id_field")]
    pub doc_id: String,
    #[serde(default = "default_year_field")]
    pub year: String,
    #[serde(default = "default_author_field")]
    pub first_author: String,
    #[serde(default = "default_pub_type_field")]
    pub publication_type: String,
    #[serde(default = "default_journal_field")]
    pub journal: String,
    #[serde(default = "default_terms_field")]
    pub controlled_terms: String,
    #[serde(default = "default_is_human_field")]
    pub is_human: String,
    #[serde(default = "default_is_animal_field")]
    pub is_animal: String,
}

fn default_doc_id_field() -> String { "doc_id".into() }
fn default_year_field() -> String { "year".into() }
fn default_author_field() -> String { "first_author".into() }
fn default_pub_type_field() -> String { "publication_type".into() }
fn default_journal_field() -> String { "journal".into() }
fn default_terms_field() -> String { "controlled_vocabulary_terms".into() }
fn default_is_human_field() -> String { "is_human".into() }
fn default_is_animal_field() -> String { "is_animal".into() }

impl Default for FilterFields {
    fn default() -> Self {
        Self {
            doc_id: default_doc_id_field(),
            year: default_year_field(),
            first_author: default_author_field(),
            publication_type: default_pub_type_field(),
            journal: default_journal_field(),
            controlled_terms: default_terms_field(),
            is_human: default_is_human_field(),
            is_animal: default_is_animal_field(),
        }
    }
}

/// Two-stage retrieval sizes and the diversity policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// K1: unique documents kept from stage 1.
    #[serde(default = "default_abstract_top_n")]
    pub abstract_top_n: usize,
    /// K2: chunks requested from stage 2.
    #[serde(default = "default_chunk_top_k")]
    pub chunk_top_k: usize,
    /// C: diversity cap per document.
    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: usize,
    /// N: evidence set size handed to synthesis.
    #[serde(default = "default_target_return_size")]
    pub target_return_size: usize,
}

fn default_abstract_top_n() -> usize { 50 }
fn default_chunk_top_k() -> usize { 40 }
fn default_max_chunks_per_doc() -> usize { 3 }
fn default_target_return_size() -> usize { 15 }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            abstract_top_n: default_abstract_top_n(),
            chunk_top_k: default_chunk_top_k(),
            max_chunks_per_doc: default_max_chunks_per_doc(),
            target_return_size: default_target_return_size(),
        }
    }
}

/// Score adjustment tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default)]
    pub evidence: EvidenceWeights,
    #[serde(default)]
    pub sections: SectionWeights,
    #[serde(default)]
    pub recency: RecencyConfig,
}

/// Boost per evidence tier. Must be non-negative and non-increasing from
/// the strongest tier down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceWeights {
    #[serde(default = "w_meta_analysis")]
    pub meta_analysis: f32,
    #[serde(default = "w_systematic_review")]
    pub systematic_review: f32,
    #[serde(default = "w_guideline")]
    pub guideline: f32,
    #[serde(default = "w_rct")]
    pub randomized_controlled_trial: f32,
    #[serde(default = "w_clinical_trial")]
    pub clinical_trial: f32,
    #[serde(default = "w_observational")]
    pub observational: f32,
    #[serde(default = "w_review")]
    pub review: f32,
    #[serde(default = "w_case_report")]
    pub case_report: f32,
    #[serde(default)]
    pub unclassified: f32,
}

fn w_meta_analysis() -> f32 { 1.00 }
fn w_systematic_review() -> f32 { 0.95 }
fn w_guideline() -> f32 { 0.90 }
fn w_rct() -> f32 { 0.85 }
fn w_clinical_trial() -> f32 { 0.75 }
fn w_observational() -> f32 { 0.60 }
fn w_review() -> f32 { 0.55 }
fn w_case_report() -> f32 { 0.30 }

impl Default for EvidenceWeights {
    fn default() -> Self {
        Self {
            meta_analysis: w_meta_analysis(),
            systematic_review: w_systematic_review(),
            guideline: w_guideline(),
            randomized_controlled_trial: w_rct(),
            clinical_trial: w_clinical_trial(),
            observational: w_observational(),
            review: w_review(),
            case_report: w_case_report(),
            unclassified: 0.0,
        }
    }
}

impl EvidenceWeights {
    pub fn boost(&self, tier: EvidenceTier) -> f32 {
        match tier {
            EvidenceTier::MetaAnalysis => self.meta_analysis,
            EvidenceTier::SystematicReview => self.systematic_review,
            EvidenceTier::Guideline => self.guideline,
            EvidenceTier::RandomizedControlledTrial => self.randomized_controlled_trial,
            EvidenceTier::ClinicalTrial => self.clinical_trial,
            EvidenceTier::Observational => self.observational,
            EvidenceTier::Review => self.review,
            EvidenceTier::CaseReport => self.case_report,
            EvidenceTier::Unclassified => self.unclassified,
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut previous: Option<(EvidenceTier, f32)> = None;
        for tier in EvidenceTier::ORDERED {
            let w = self.boost(tier);
            if w < 0.0 || !w.is_finite() {
                problems.push(format!("rerank.evidence.{tier:?} must be a non-negative number"));
            }
            if let Some((prev_tier, prev)) = previous {
                if w > prev {
                    problems.push(format!(
                        "rerank.evidence: {tier:?} ({w}) outranks stronger tier {prev_tier:?} ({prev})"
                    ));
                }
            }
            previous = Some((tier, w));
        }
        problems
    }
}

/// Boost per section class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionWeights {
    #[serde(default = "w_results")]
    pub results: f32,
    #[serde(default = "w_conclusions")]
    pub conclusions: f32,
    #[serde(default)]
    pub discussion: f32,
    #[serde(default)]
    pub methods: f32,
    #[serde(default, rename = "abstract")]
    pub abstract_section: f32,
    #[serde(default = "w_introduction")]
    pub introduction: f32,
    #[serde(default)]
    pub other: f32,
}

fn w_results() -> f32 { 1.5 }
fn w_conclusions() -> f32 { 1.5 }
fn w_introduction() -> f32 { -0.5 }

impl Default for SectionWeights {
    fn default() -> Self {
        Self {
            results: w_results(),
            conclusions: w_conclusions(),
            discussion: 0.0,
            methods: 0.0,
            abstract_section: 0.0,
            introduction: w_introduction(),
            other: 0.0,
        }
    }
}

impl SectionWeights {
    pub fn boost(&self, kind: SectionKind) -> f32 {
        match kind {
            SectionKind::Results => self.results,
            SectionKind::Conclusions => self.conclusions,
            SectionKind::Discussion => self.discussion,
            SectionKind::Methods => self.methods,
            SectionKind::Abstract => self.abstract_section,
            SectionKind::Introduction => self.introduction,
            SectionKind::Other => self.other,
        }
    }

    /// Every weight finite; results and conclusions never penalized.
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, w) in [
            ("results", self.results),
            ("conclusions", self.conclusions),
            ("discussion", self.discussion),
            ("methods", self.methods),
            ("abstract", self.abstract_section),
            ("introduction", self.introduction),
            ("other", self.other),
        ] {
            if !w.is_finite() {
                problems.push(format!("rerank.sections.{name} must be a finite number"));
            }
        }
        for (name, w) in [("results", self.results), ("conclusions", self.conclusions)] {
            if w < 0.0 {
                problems.push(format!("rerank.sections.{name} must be non-negative"));
            }
        }
        problems
    }
}

/// `max_boost * exp(-gap / decay_years)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyConfig {
    #[serde(default = "default_recency_max")]
    pub max_boost: f32,
    #[serde(default = "default_recency_decay")]
    pub decay_years: f32,
}

fn default_recency_max() -> f32 { 0.25 }
fn default_recency_decay() -> f32 { 5.0 }

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            max_boost: default_recency_max(),
            decay_years: default_recency_decay(),
        }
    }
}

impl RecencyConfig {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(self.max_boost.is_finite() && self.max_boost >= 0.0) {
            problems.push("rerank.recency.max_boost must be a non-negative number".into());
        }
        if !(self.decay_years.is_finite() && self.decay_years > 0.0) {
            problems.push("rerank.recency.decay_years must be a positive number".into());
        }
        problems
    }
}

/// Conversation memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session is evicted.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Most recent turns offered to the reformulator.
    #[serde(default = "default_history_max_turns")]
    pub history_max_turns: usize,
    /// Rough token budget (4 chars ≈ 1 token) for that window.
    #[serde(default = "default_history_token_budget")]
    pub history_token_budget: usize,
}

fn default_ttl_secs() -> u64 { 3600 }
fn default_sweep_interval() -> u64 { 60 }
fn default_history_max_turns() -> usize { 12 }
fn default_history_token_budget() -> usize { 1500 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval(),
            history_max_turns: default_history_max_turns(),
            history_token_budget: default_history_token_budget(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Answer synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Upper bound on the evidence block handed to the generator.
    #[serde(default = "default_context_budget")]
    pub context_char_budget: usize,
    /// Conversation turns replayed before the question.
    #[serde(default = "default_tail_turns")]
    pub tail_turns: usize,
    /// Domain the literature index covers; used in prompts.
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_context_budget() -> usize { 12000 }
fn default_tail_turns() -> usize { 4 }
fn default_subject() -> String { "Hereditary Hemorrhagic Telangiectasia (HHT)".into() }

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            context_char_budget: default_context_budget(),
            tail_turns: default_tail_turns(),
            subject: default_subject(),
        }
    }
}

/// Per-call deadlines for external services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_reformulate_secs")]
    pub reformulate_secs: u64,
    #[serde(default = "default_parse_secs")]
    pub parse_secs: u64,
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,
    #[serde(default = "default_generate_secs")]
    pub generate_secs: u64,
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_reformulate_secs() -> u64 { 15 }
fn default_parse_secs() -> u64 { 20 }
fn default_search_secs() -> u64 { 10 }
fn default_generate_secs() -> u64 { 60 }
fn default_backoff_ms() -> u64 { 500 }

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            reformulate_secs: default_reformulate_secs(),
            parse_secs: default_parse_secs(),
            search_secs: default_search_secs(),
            generate_secs: default_generate_secs(),
            retry_backoff_ms: default_backoff_ms(),
        }
    }
}

impl TimeoutConfig {
    fn policy(&self, secs: u64) -> CallPolicy {
        CallPolicy::new(Duration::from_secs(secs), Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn reformulate(&self) -> CallPolicy {
        self.policy(self.reformulate_secs)
    }

    pub fn parse(&self) -> CallPolicy {
        self.policy(self.parse_secs)
    }

    pub fn search(&self) -> CallPolicy {
        self.policy(self.search_secs)
    }

    pub fn generate(&self) -> CallPolicy {
        self.policy(self.generate_secs)
    }
}

fn default_glossary() -> BTreeMap<String, String> {
    [
        ("HHT", "hereditary hemorrhagic telangiectasia"),
        ("AVM", "arteriovenous malformation"),
        ("PAVM", "pulmonary arteriovenous malformation"),
        ("ENG", "endoglin"),
        ("ACVRL1", "activin receptor-like kinase 1 (ALK1)"),
        ("VEGF", "vascular endothelial growth factor"),
        ("ESS", "epistaxis severity score"),
        ("RCT", "randomized controlled trial"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
