//! Inline citation handling.
//!
//! Answers cite sources as `[PMID: <id>]` (several ids may share one
//! bracket, separated by commas or semicolons). The audit keeps only
//! citations of documents that were actually supplied as evidence.

use std::collections::HashMap;
use std::sync::LazyLock;

use pubrag_core::types::{Citation, dedup_preserving_order};
use regex::Regex;

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*PMIDs?\s*:\s*([^\]]+)\]").expect("citation pattern is valid")
});

/// Bare mentions in user text, e.g. `PMID 40648782` or `pmid: 123`.
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bPMIDs?\s*:?\s*(\d{4,9})\b").expect("mention pattern is valid")
});

fn split_ids(group: &str) -> impl Iterator<Item = String> + '_ {
    group
        .split([',', ';'])
        .map(|id| id.trim().trim_start_matches("PMID:").trim())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .map(String::from)
}

/// Ids cited with bracket markers, in order of first appearance.
pub fn cited_doc_ids(text: &str) -> Vec<String> {
    let ids = CITATION_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .flat_map(|m| split_ids(m.as_str()).collect::<Vec<_>>())
        .collect();
    dedup_preserving_order(ids)
}

/// Ids the user names explicitly, with or without brackets.
pub fn mentioned_doc_ids(text: &str) -> Vec<String> {
    let mut ids = cited_doc_ids(text);
    ids.extend(
        MENTION_RE
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
    );
    dedup_preserving_order(ids)
}

/// Rewrite citation markers, keeping only ids accepted by `keep`. Markers
/// left with no ids are removed together with the space before them.
pub fn retain_citations(text: &str, keep: impl Fn(&str) -> bool) -> (String, Vec<String>) {
    let mut removed = Vec::new();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in CITATION_RE.captures_iter(text) {
        let (Some(whole), Some(group)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let ids: Vec<String> = split_ids(group.as_str()).collect();
        let (kept, dropped): (Vec<String>, Vec<String>) = ids.into_iter().partition(|id| keep(id));
        if dropped.is_empty() {
            continue;
        }
        removed.extend(dropped);

        let mut prefix = &text[last..whole.start()];
        if kept.is_empty() {
            prefix = prefix.trim_end_matches(' ');
        }
        out.push_str(prefix);
        if !kept.is_empty() {
            out.push_str(&format!("[PMID: {}]", kept.join(", ")));
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    (out, dedup_preserving_order(removed))
}

/// Result of checking an answer against the evidence it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationAudit {
    /// Answer with citations of unsupplied documents removed.
    pub text: String,
    /// Supplied documents the answer cites, in order of first citation.
    pub citations: Vec<Citation>,
    /// Ids cited but never supplied.
    pub stripped: Vec<String>,
    /// Sentences of four or more words without any citation.
    pub uncited_sentences: usize,
}

/// Audit `answer` against `supplied` (doc id → citation label).
pub fn audit(answer: &str, supplied: &HashMap<String, String>) -> CitationAudit {
    let (text, stripped) = retain_citations(answer, |id| supplied.contains_key(id));
    let citations = cited_doc_ids(&text)
        .into_iter()
        .filter_map(|id| {
            let label = supplied.get(&id)?.clone();
            Some(Citation { doc_id: id, label })
        })
        .collect();
    let uncited_sentences = sentences(&text)
        .filter(|s| s.split_whitespace().count() >= 4)
        .filter(|s| !s.trim_end().ends_with(':'))
        .filter(|s| !CITATION_RE.is_match(s))
        .count();

    CitationAudit {
        text,
        citations,
        stripped,
        uncited_sentences,
    }
}

/// Split on sentence-ending punctuation followed by whitespace, and on
/// line breaks. A citation directly after the full stop stays with its
/// sentence.
fn sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut out = Vec::new();
    for line in text.lines() {
        let mut start = 0;
        let bytes = line.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let is_end = matches!(bytes[i], b'.' | b'?' | b'!')
                && bytes.get(i + 1).is_some_and(|b| b.is_ascii_whitespace());
            if is_end {
                // Keep a trailing `[PMID: ..]` with the sentence it closes.
                let rest = line[i + 1..].trim_start();
                if rest.starts_with("[PMID") || (rest.starts_with('(') && rest.contains("[PMID")) {
                    i += 1;
                    continue;
                }
                out.push(&line[start..=i]);
                start = i + 1;
            }
            i += 1;
        }
        if start < line.len() {
            out.push(&line[start..]);
        }
    }
    out.into_iter().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplied(ids: &[&str]) -> HashMap<String, String> {
        ids.iter().map(|id| (id.to_string(), format!("Author{id}, 2020"))).collect()
    }

    #[test]
    fn test_cited_doc_ids() {
        let text = "A (Smith, 2022) [PMID: 123]. B [PMID: 456, 123]. C [PMIDs: 789; 456].";
        assert_eq!(cited_doc_ids(text), vec!["123", "456", "789"]);
        assert!(cited_doc_ids("no citations").is_empty());
    }

    #[test]
    fn test_mentioned_doc_ids() {
        let text = "Tell me about PMID 40648782 and [PMID: 31594285]";
        assert_eq!(mentioned_doc_ids(text), vec!["31594285", "40648782"]);
    }

    #[test]
    fn test_retain_citations_strips_unknown() {
        let (text, removed) = retain_citations("Claim [PMID: 1]. Other [PMID: 9]. Mixed [PMID: 1, 9].", |id| id == "1");
        assert_eq!(text, "Claim [PMID: 1]. Other. Mixed [PMID: 1].");
        assert_eq!(removed, vec!["9"]);
    }

    #[test]
    fn test_audit_counts_and_labels() {
        let answer = "Bevacizumab reduced epistaxis severity (AuthorP1, 2020) [PMID: P1]. \
                      Patients also reported fewer transfusions overall. \
                      Tacrolimus was tried too [PMID: P7].";
        let a = audit(answer, &supplied(&["P1", "P2"]));
        assert_eq!(a.citations, vec![Citation { doc_id: "P1".into(), label: "AuthorP1, 2020".into() }]);
        assert_eq!(a.stripped, vec!["P7"]);
        assert!(!a.text.contains("P7"));
        assert_eq!(a.uncited_sentences, 2);
    }

    #[test]
    fn test_citation_after_full_stop_stays_with_sentence() {
        let a = audit("Epistaxis improved in most patients. [PMID: P1]", &supplied(&["P1"]));
        assert_eq!(a.uncited_sentences, 0);
    }
}
