//! Structured query parsing.
//!
//! Turns a standalone query into a retrieval query plus metadata filters,
//! or into a clarification question when a key term is critically
//! ambiguous. Each extracted filter is validated on its own; a bad one is
//! dropped without discarding the rest.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Datelike;
use pubrag_core::call::{CallPolicy, bounded};
use pubrag_core::config::PubragConfig;
use pubrag_core::traits::provider::{GenerateParams, Provider};
use pubrag_core::traits::search::SearchFilter;
use pubrag_core::types::{EvidenceTier, Message, YearRange, dedup_preserving_order};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::citation;
use crate::prompts;
use crate::text::unwrap_model_text;

const MAX_AUTHOR_LEN: usize = 60;
const MAX_JOURNAL_LEN: usize = 200;
const MAX_TERM_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub search_query: String,
    pub filters: SearchFilter,
    /// Set when retrieval should not proceed until the user answers.
    pub clarification: Option<String>,
    /// The parse call failed and the query was expanded locally instead.
    pub degraded: bool,
}

impl ParsedQuery {
    pub fn needs_clarification(&self) -> bool {
        self.clarification.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawParse {
    #[serde(default)]
    clarification_required: Option<Value>,
    #[serde(default)]
    optimized_query: Option<String>,
    #[serde(default)]
    metadata_filters: Option<RawFilters>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFilters {
    #[serde(default)]
    publication_year: Option<Value>,
    #[serde(default)]
    first_author_lastname: Option<Value>,
    #[serde(default)]
    publication_types: Option<Value>,
    #[serde(default)]
    journal_name: Option<Value>,
    #[serde(default)]
    mesh_major_terms: Option<Value>,
    #[serde(default)]
    is_human: Option<Value>,
    #[serde(default)]
    is_animal: Option<Value>,
}

pub struct QueryParser {
    provider: Arc<dyn Provider>,
    params: GenerateParams,
    policy: CallPolicy,
    system_prompt: String,
    glossary: BTreeMap<String, String>,
    current_year: i32,
}

impl QueryParser {
    pub fn new(provider: Arc<dyn Provider>, config: &PubragConfig) -> Self {
        Self {
            provider,
            params: GenerateParams::deterministic(&config.llm.model, 512).with_json(),
            policy: config.timeouts.parse(),
            system_prompt: prompts::parser_prompt(&config.synthesis.subject),
            glossary: config.glossary.clone(),
            current_year: chrono::Utc::now().year(),
        }
    }

    /// Pin the year used to bound year filters.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    /// Parse `standalone`. `referenced_ids` (from reformulation) and any ids
    /// named in the query become a doc-id filter.
    pub async fn parse(&self, standalone: &str, referenced_ids: &[String]) -> ParsedQuery {
        let mut doc_ids = referenced_ids.to_vec();
        doc_ids.extend(citation::mentioned_doc_ids(standalone));
        let doc_ids = dedup_preserving_order(doc_ids);

        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(prompts::parser_request(standalone)),
        ];
        let result = bounded("query parse", &self.policy, || {
            self.provider.chat(&messages, &self.params)
        })
        .await;

        let raw = match result.map(|r| r.content.unwrap_or_default()) {
            Ok(content) => match extract_json(&content) {
                Some(raw) => raw,
                None => {
                    tracing::warn!("⚠️ parser: reply is not a JSON object; expanding locally");
                    return self.degraded(standalone, doc_ids);
                }
            },
            Err(e) => {
                tracing::warn!("⚠️ parser: {e}; expanding locally");
                return self.degraded(standalone, doc_ids);
            }
        };

        if let Some(question) = clarification_text(raw.clarification_required.as_ref()) {
            tracing::info!("❓ parser: clarification needed");
            return ParsedQuery {
                search_query: standalone.to_string(),
                filters: SearchFilter::doc_ids(doc_ids),
                clarification: Some(question),
                degraded: false,
            };
        }

        let search_query = raw
            .optimized_query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| expand_jargon(standalone, &self.glossary));

        let mut filters = SearchFilter::doc_ids(doc_ids);
        if let Some(raw_filters) = raw.metadata_filters {
            self.apply_filters(raw_filters, &mut filters);
        }

        tracing::debug!("parser: query '{search_query}', filters {filters:?}");
        ParsedQuery {
            search_query,
            filters,
            clarification: None,
            degraded: false,
        }
    }

    fn degraded(&self, standalone: &str, doc_ids: Vec<String>) -> ParsedQuery {
        ParsedQuery {
            search_query: expand_jargon(standalone, &self.glossary),
            filters: SearchFilter::doc_ids(doc_ids),
            clarification: None,
            degraded: true,
        }
    }

    fn apply_filters(&self, raw: RawFilters, filters: &mut SearchFilter) {
        if let Some(value) = raw.publication_year.filter(|v| !is_blank(v)) {
            match self.year_range(&value) {
                Some(range) => filters.year_range = Some(range),
                None => tracing::warn!("⚠️ parser: dropped invalid year filter {value}"),
            }
        }

        if let Some(value) = raw.first_author_lastname.filter(|v| !is_blank(v)) {
            match author_name(&value) {
                Some(name) => filters.first_author = Some(name),
                None => tracing::warn!("⚠️ parser: dropped invalid author filter {value}"),
            }
        }

        if let Some(labels) = string_list("publication type", raw.publication_types) {
            let (known, unknown): (Vec<String>, Vec<String>) = labels
                .into_iter()
                .partition(|l| EvidenceTier::from_label(l) != EvidenceTier::Unclassified);
            if !unknown.is_empty() {
                tracing::warn!("⚠️ parser: dropped unknown publication types {unknown:?}");
            }
            filters.publication_types = dedup_preserving_order(known);
        }

        if let Some(value) = raw.journal_name.filter(|v| !is_blank(v)) {
            match journal_name(&value) {
                Some(name) => filters.journal = Some(name),
                None => tracing::warn!("⚠️ parser: dropped invalid journal filter {value}"),
            }
        }

        if let Some(terms) = string_list("MeSH term", raw.mesh_major_terms) {
            let (valid, invalid): (Vec<String>, Vec<String>) = terms.into_iter().partition(|t| controlled_term(t));
            if !invalid.is_empty() {
                tracing::warn!("⚠️ parser: dropped invalid MeSH terms {invalid:?}");
            }
            filters.controlled_terms = dedup_preserving_order(valid);
        }

        filters.is_human = flag_filter("is_human", raw.is_human);
        filters.is_animal = flag_filter("is_animal", raw.is_animal);
    }

    /// A single year or an `A-B` range (either side may be open), within
    /// `1800..=current_year + 1`.
    fn year_range(&self, value: &Value) -> Option<YearRange> {
        let valid = |y: i32| YearRange::plausible(y, self.current_year);
        let parse_year = |s: &str| s.trim().parse::<i32>().ok().filter(|y| valid(*y));

        match value {
            Value::Number(n) => {
                let year = i32::try_from(n.as_i64()?).ok().filter(|y| valid(*y))?;
                Some(YearRange::single(year))
            }
            Value::String(s) => {
                let s = s.trim();
                let Some((from, to)) = s.split_once(['-', '–']) else {
                    return parse_year(s).map(YearRange::single);
                };
                let from = if from.trim().is_empty() { None } else { Some(parse_year(from)?) };
                let to = if to.trim().is_empty() { None } else { Some(parse_year(to)?) };
                if from.is_none() && to.is_none() {
                    return None;
                }
                if let (Some(f), Some(t)) = (from, to) {
                    if f > t {
                        return None;
                    }
                }
                Some(YearRange { from, to })
            }
            _ => None,
        }
    }
}

/// Pull the JSON object out of a model reply that may carry fences or
/// surrounding prose.
fn extract_json(content: &str) -> Option<RawParse> {
    let text = unwrap_model_text(content);
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn blank_text(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("none")
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => blank_text(s),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// A string or an array of strings, trimmed, blanks removed. `None` when
/// the field is absent or holds nothing usable.
fn string_list(what: &str, value: Option<Value>) -> Option<Vec<String>> {
    let items: Vec<String> = match value.filter(|v| !is_blank(v))? {
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        other => {
            tracing::warn!("⚠️ parser: dropped invalid {what} filter {other}");
            return None;
        }
    };
    let items: Vec<String> = items
        .into_iter()
        .map(|i| i.trim().to_string())
        .filter(|i| !blank_text(i))
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Booleans, or their plain-text spellings.
fn flag_filter(name: &str, value: Option<Value>) -> Option<bool> {
    let value = value.filter(|v| !is_blank(v))?;
    let flag = match &value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    };
    if flag.is_none() {
        tracing::warn!("⚠️ parser: dropped invalid {name} filter {value}");
    }
    flag
}

fn clarification_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !blank_text(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Letters, spaces, hyphens and apostrophes only.
fn author_name(value: &Value) -> Option<String> {
    let name = value.as_str()?.trim();
    let valid = !name.is_empty()
        && name.chars().count() <= MAX_AUTHOR_LEN
        && name
            .chars()
            .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'' || c == '’');
    valid.then(|| name.to_string())
}

fn journal_name(value: &Value) -> Option<String> {
    let name = value.as_str()?.trim();
    let valid = !name.is_empty()
        && name.chars().count() <= MAX_JOURNAL_LEN
        && name.chars().any(char::is_alphabetic)
        && !name.chars().any(char::is_control);
    valid.then(|| name.to_string())
}

/// MeSH headings: letters, digits, spaces and `,-'()/` only.
fn controlled_term(term: &str) -> bool {
    !term.is_empty()
        && term.chars().count() <= MAX_TERM_LEN
        && term.chars().any(char::is_alphabetic)
        && term
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ' ' | ',' | '-' | '\'' | '(' | ')' | '/'))
}

/// Expand the first whole-word occurrence of each glossary abbreviation,
/// e.g. `HHT` → `HHT (hereditary hemorrhagic telangiectasia)`. Terms whose
/// expansion already appears are left alone.
pub fn expand_jargon(query: &str, glossary: &BTreeMap<String, String>) -> String {
    let mut out = query.to_string();
    for (abbreviation, expansion) in glossary {
        if abbreviation.is_empty() || out.to_lowercase().contains(&expansion.to_lowercase()) {
            continue;
        }
        let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(abbreviation))) else {
            continue;
        };
        let Some(m) = re.find(&out) else {
            continue;
        };
        let end = m.end();
        out.insert_str(end, &format!(" ({expansion})"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubrag_core::error::PubragError;
    use pubrag_core::testing::ScriptedProvider;

    fn parser(provider: ScriptedProvider) -> (Arc<ScriptedProvider>, QueryParser) {
        let provider = Arc::new(provider);
        let mut config = PubragConfig::default();
        config.timeouts.retry_backoff_ms = 1;
        let parser = QueryParser::new(provider.clone(), &config).with_current_year(2025);
        (provider, parser)
    }

    #[tokio::test]
    async fn test_extracts_valid_filters() {
        let (provider, p) = parser(ScriptedProvider::fixed(
            r#"```json
            {"clarification_required": null,
             "optimized_query": "bevacizumab epistaxis hereditary hemorrhagic telangiectasia (HHT)",
             "metadata_filters": {"publication_year": "2015-2020",
                                  "first_author_lastname": "Dupuis-Girod",
                                  "publication_types": ["Randomized Controlled Trial"]}}
            ```"#,
        ));
        let out = p.parse("RCTs by Dupuis-Girod on bevacizumab 2015-2020", &[]).await;
        assert!(!out.degraded);
        assert!(out.search_query.starts_with("bevacizumab epistaxis"));
        assert_eq!(out.filters.year_range, Some(YearRange { from: Some(2015), to: Some(2020) }));
        assert_eq!(out.filters.first_author.as_deref(), Some("Dupuis-Girod"));
        assert_eq!(out.filters.publication_types, vec!["Randomized Controlled Trial"]);

        let (_, params) = &provider.requests()[0];
        assert!(params.json_mode);
        assert_eq!(params.temperature, 0.0);
    }

    #[tokio::test]
    async fn test_invalid_filters_dropped_individually() {
        let (_, p) = parser(ScriptedProvider::fixed(
            r#"{"optimized_query": "thalidomide epistaxis",
                "metadata_filters": {"publication_year": 3024,
                                     "first_author_lastname": "Smith; DROP TABLE",
                                     "publication_types": ["Blog Post", "Meta-Analysis"]}}"#,
        ));
        let out = p.parse("thalidomide for nosebleeds", &[]).await;
        assert_eq!(out.search_query, "thalidomide epistaxis");
        assert_eq!(out.filters.year_range, None);
        assert_eq!(out.filters.first_author, None);
        assert_eq!(out.filters.publication_types, vec!["Meta-Analysis"]);
        assert!(!out.degraded);
    }

    #[tokio::test]
    async fn test_population_journal_and_mesh_filters() {
        let (_, p) = parser(ScriptedProvider::fixed(
            r#"{"optimized_query": "bevacizumab epistaxis",
                "metadata_filters": {"journal_name": "Orphanet Journal of Rare Diseases",
                                     "mesh_major_terms": ["Bevacizumab", "Epistaxis", "<script>", "Bevacizumab"],
                                     "is_human": true,
                                     "is_animal": "no"}}"#,
        ));
        let out = p.parse("human studies of bevacizumab in Orphanet J Rare Dis", &[]).await;
        assert_eq!(out.filters.journal.as_deref(), Some("Orphanet Journal of Rare Diseases"));
        assert_eq!(out.filters.controlled_terms, vec!["Bevacizumab", "Epistaxis"]);
        assert_eq!(out.filters.is_human, Some(true));
        assert_eq!(out.filters.is_animal, Some(false));
    }

    #[tokio::test]
    async fn test_bad_flags_and_journal_dropped_individually() {
        let (_, p) = parser(ScriptedProvider::fixed(
            r#"{"optimized_query": "ENG mouse model",
                "metadata_filters": {"journal_name": 42,
                                     "mesh_major_terms": "Endoglin",
                                     "is_human": "maybe",
                                     "is_animal": true,
                                     "publication_year": "2010-"}}"#,
        ));
        let out = p.parse("endoglin mouse models since 2010", &[]).await;
        assert_eq!(out.filters.journal, None);
        assert_eq!(out.filters.is_human, None);
        assert_eq!(out.filters.is_animal, Some(true));
        assert_eq!(out.filters.controlled_terms, vec!["Endoglin"]);
        assert_eq!(out.filters.year_range, Some(YearRange { from: Some(2010), to: None }));
    }

    #[test]
    fn test_year_forms() {
        let (_, p) = parser(ScriptedProvider::fixed("{}"));
        assert_eq!(p.year_range(&serde_json::json!(2021)), Some(YearRange::single(2021)));
        assert_eq!(p.year_range(&serde_json::json!("2019")), Some(YearRange::single(2019)));
        assert_eq!(
            p.year_range(&serde_json::json!("2019-")),
            Some(YearRange { from: Some(2019), to: None })
        );
        assert_eq!(p.year_range(&serde_json::json!("2020-2015")), None);
        assert_eq!(p.year_range(&serde_json::json!("recent")), None);
        assert_eq!(p.year_range(&serde_json::json!(1700)), None);
        assert_eq!(p.year_range(&serde_json::json!(2026)), Some(YearRange::single(2026)));
    }

    #[tokio::test]
    async fn test_clarification_short_circuits() {
        let (_, p) = parser(ScriptedProvider::fixed(
            r#"{"clarification_required": "Does ENG mean the endoglin gene or engineering?",
                "optimized_query": "ENG", "metadata_filters": {}}"#,
        ));
        let out = p.parse("what about ENG?", &[]).await;
        assert!(out.needs_clarification());
        assert!(out.clarification.as_deref().is_some_and(|q| q.contains("endoglin")));
    }

    #[tokio::test]
    async fn test_null_string_is_not_a_clarification() {
        let (_, p) = parser(ScriptedProvider::fixed(
            r#"{"clarification_required": "null", "optimized_query": "HHT epistaxis"}"#,
        ));
        assert!(!p.parse("HHT nosebleeds", &[]).await.needs_clarification());
    }

    #[tokio::test]
    async fn test_malformed_reply_degrades_to_glossary_expansion() {
        let (provider, p) = parser(ScriptedProvider::fixed("Sure! Here is your query: HHT bleeding"));
        let out = p.parse("Is HHT linked to AVM bleeding?", &[]).await;
        assert!(out.degraded);
        assert!(out.search_query.contains("HHT (hereditary hemorrhagic telangiectasia)"));
        assert!(out.search_query.contains("AVM (arteriovenous malformation)"));
        assert!(out.clarification.is_none());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_service_failure_degrades() {
        let (provider, p) = parser(ScriptedProvider::new(|_, _| {
            Err(PubragError::Provider("model overloaded".into()))
        }));
        let out = p.parse("HHT epistaxis", &[]).await;
        assert!(out.degraded);
        // Non-transient errors are not retried.
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_doc_ids_merge_referenced_and_mentioned() {
        let (_, p) = parser(ScriptedProvider::fixed(r#"{"optimized_query": "adverse events"}"#));
        let out = p
            .parse("adverse events in PMID 31594285", &["22553075".to_string()])
            .await;
        assert_eq!(out.filters.doc_ids, vec!["22553075", "31594285"]);
    }

    #[test]
    fn test_expand_jargon_whole_words_only() {
        let glossary: BTreeMap<String, String> =
            [("HHT".to_string(), "hereditary hemorrhagic telangiectasia".to_string())].into();
        assert_eq!(expand_jargon("HHTX trial", &glossary), "HHTX trial");
        assert_eq!(
            expand_jargon("HHT and HHT", &glossary),
            "HHT (hereditary hemorrhagic telangiectasia) and HHT"
        );
        let already = "hereditary hemorrhagic telangiectasia (HHT)";
        assert_eq!(expand_jargon(already, &glossary), already);
    }

    #[test]
    fn test_author_name_validation() {
        assert_eq!(author_name(&serde_json::json!("O'Brien")).as_deref(), Some("O'Brien"));
        assert_eq!(author_name(&serde_json::json!("van der Berg")).as_deref(), Some("van der Berg"));
        assert!(author_name(&serde_json::json!("Smith2")).is_none());
        assert!(author_name(&serde_json::json!(42)).is_none());
    }

    #[test]
    fn test_controlled_term_validation() {
        assert!(controlled_term("Telangiectasia, Hereditary Hemorrhagic"));
        assert!(controlled_term("Activin Receptors, Type II"));
        assert!(!controlled_term("Bevacizumab; DROP TABLE"));
        assert!(!controlled_term("123"));
        assert!(!controlled_term(&"a".repeat(MAX_TERM_LEN + 1)));
    }
}
