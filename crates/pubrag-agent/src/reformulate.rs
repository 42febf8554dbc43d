//! Conversational query reformulation.
//!
//! Resolves pronouns and ellipses against a bounded window of recent turns
//! so the retrieval stages see a standalone query. The generation call is
//! best-effort: on failure the raw text passes through unchanged.

use std::collections::HashSet;
use std::sync::Arc;

use pubrag_core::call::{CallPolicy, bounded};
use pubrag_core::config::PubragConfig;
use pubrag_core::traits::provider::{GenerateParams, Provider};
use pubrag_core::types::{Message, Turn, dedup_preserving_order};

use crate::citation;
use crate::prompts;
use crate::text::{estimate_tokens, safe_truncate, unwrap_model_text};

/// Output of one reformulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reformulation {
    pub standalone_query: String,
    /// Documents the user points back to, validated against the history
    /// window and the raw text.
    pub referenced_doc_ids: Vec<String>,
    /// The raw text was passed through because the service failed.
    pub degraded: bool,
}

impl Reformulation {
    fn passthrough(raw: &str, degraded: bool) -> Self {
        Self {
            standalone_query: raw.to_string(),
            referenced_doc_ids: citation::mentioned_doc_ids(raw),
            degraded,
        }
    }
}

pub struct QueryReformulator {
    provider: Arc<dyn Provider>,
    params: GenerateParams,
    policy: CallPolicy,
    max_turns: usize,
    token_budget: usize,
}

impl QueryReformulator {
    pub fn new(provider: Arc<dyn Provider>, config: &PubragConfig) -> Self {
        Self {
            provider,
            params: GenerateParams::deterministic(&config.llm.model, 256),
            policy: config.timeouts.reformulate(),
            max_turns: config.session.history_max_turns,
            token_budget: config.session.history_token_budget,
        }
    }

    /// Most recent turns that fit both the turn cap and the token budget.
    /// The newest turn is always included when history is non-empty.
    pub fn history_window<'a>(&self, history: &'a [Turn]) -> &'a [Turn] {
        let mut used = 0usize;
        let mut start = history.len();
        for (i, turn) in history.iter().enumerate().rev() {
            if history.len() - i > self.max_turns {
                break;
            }
            let cost = estimate_tokens(&turn.text);
            if used + cost > self.token_budget && start < history.len() {
                break;
            }
            used += cost;
            start = i;
        }
        &history[start..]
    }

    pub async fn reformulate(&self, raw: &str, history: &[Turn]) -> Reformulation {
        let window = self.history_window(history);
        if window.is_empty() {
            return Reformulation::passthrough(raw, false);
        }

        // A single oversized turn is cut to the budget.
        let max_bytes = self.token_budget.saturating_mul(4);
        let mut messages = vec![Message::system(prompts::REFORMULATION_PROMPT)];
        messages.extend(window.iter().map(|t| {
            let mut m = t.to_message();
            m.content = safe_truncate(&m.content, max_bytes).to_string();
            m
        }));
        messages.push(Message::user(prompts::reformulation_request(raw)));

        let result = bounded("reformulation", &self.policy, || {
            self.provider.chat(&messages, &self.params)
        })
        .await;

        let rewritten = match result {
            Ok(resp) => resp.content.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("⚠️ reformulator: {e}; using the raw query");
                return Reformulation::passthrough(raw, true);
            }
        };
        let rewritten = unwrap_model_text(&rewritten);
        if rewritten.is_empty() {
            tracing::warn!("⚠️ reformulator: empty rewrite; using the raw query");
            return Reformulation::passthrough(raw, true);
        }

        // Only ids the conversation (or the user) actually mentioned survive,
        // compared whole.
        let mut known_ids: HashSet<String> = citation::mentioned_doc_ids(raw).into_iter().collect();
        for turn in window {
            known_ids.extend(turn.doc_ids.iter().cloned());
            known_ids.extend(citation::mentioned_doc_ids(&turn.text));
        }
        let known = |id: &str| known_ids.contains(id);
        let (standalone, invented) = citation::retain_citations(rewritten, &known);
        if !invented.is_empty() {
            tracing::warn!("⚠️ reformulator: dropped unknown ids {invented:?}");
        }

        let mut referenced = citation::mentioned_doc_ids(&standalone);
        referenced.retain(|id| known(id));
        referenced.extend(citation::mentioned_doc_ids(raw));
        let referenced = dedup_preserving_order(referenced);

        tracing::info!("🔁 reformulated: '{raw}' → '{standalone}'");
        Reformulation {
            standalone_query: standalone,
            referenced_doc_ids: referenced,
            degraded: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubrag_core::testing::{ScriptedProvider, last_message};
    use pubrag_core::error::PubragError;

    fn reformulator(provider: ScriptedProvider) -> (Arc<ScriptedProvider>, QueryReformulator) {
        let provider = Arc::new(provider);
        let mut config = PubragConfig::default();
        config.timeouts.reformulate_secs = 1;
        config.timeouts.retry_backoff_ms = 1;
        (provider.clone(), QueryReformulator::new(provider, &config))
    }

    fn bevacizumab_history() -> Vec<Turn> {
        vec![
            Turn::user("Does Bevacizumab help with nosebleeds in HHT?", vec![]),
            Turn::assistant(
                "Yes, Bevacizumab reduces epistaxis severity (Dupuis-Girod, 2012) [PMID: 22553075].",
                vec!["22553075".into()],
            ),
        ]
    }

    #[tokio::test]
    async fn test_no_history_passes_through_without_call() {
        let (provider, r) = reformulator(ScriptedProvider::fixed("unused"));
        let out = r.reformulate("What is HHT?", &[]).await;
        assert_eq!(out.standalone_query, "What is HHT?");
        assert!(!out.degraded);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pronoun_resolved_from_history() {
        let (provider, r) = reformulator(ScriptedProvider::new(|messages, _| {
            assert!(last_message(messages).contains("What are its side effects?"));
            assert!(messages.iter().any(|m| m.content.contains("Bevacizumab")));
            Ok("\"What are the side effects of Bevacizumab in HHT patients?\"".into())
        }));
        let out = r.reformulate("What are its side effects?", &bevacizumab_history()).await;
        assert!(out.standalone_query.contains("Bevacizumab"));
        assert!(!out.standalone_query.contains(" its "));
        assert!(!out.degraded);
        assert_eq!(provider.call_count(), 1);
        let (_, params) = &provider.requests()[0];
        assert_eq!(params.temperature, 0.0);
    }

    #[tokio::test]
    async fn test_referenced_ids_are_validated() {
        let (_, r) = reformulator(ScriptedProvider::fixed(
            "Summarize the findings of Dupuis-Girod [PMID: 22553075] and [PMID: 99999999]",
        ));
        let out = r.reformulate("Summarize their findings", &bevacizumab_history()).await;
        assert_eq!(out.referenced_doc_ids, vec!["22553075"]);
        assert!(!out.standalone_query.contains("99999999"));
    }

    #[tokio::test]
    async fn test_truncated_id_is_not_accepted() {
        let (_, r) = reformulator(ScriptedProvider::fixed(
            "Adverse events reported in [PMID: 2255] and [PMID: 22553075]",
        ));
        let out = r.reformulate("any adverse events there?", &bevacizumab_history()).await;
        assert_eq!(out.referenced_doc_ids, vec!["22553075"]);
        assert!(!out.standalone_query.contains("2255]"));
        assert!(out.standalone_query.contains("[PMID: 22553075]"));
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_raw_query() {
        let (provider, r) = reformulator(ScriptedProvider::new(|_, _| {
            Err(PubragError::Http("connection reset".into()))
        }));
        let out = r.reformulate("and the risks of PMID 22553075?", &bevacizumab_history()).await;
        assert_eq!(out.standalone_query, "and the risks of PMID 22553075?");
        assert_eq!(out.referenced_doc_ids, vec!["22553075"]);
        assert!(out.degraded);
        // Transient failure is retried once.
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let (_, r) = reformulator(
            ScriptedProvider::fixed("late").with_delay(std::time::Duration::from_secs(5)),
        );
        let out = r.reformulate("what about it?", &bevacizumab_history()).await;
        assert_eq!(out.standalone_query, "what about it?");
        assert!(out.degraded);
    }

    #[test]
    fn test_history_window_is_bounded() {
        let (_, mut r) = reformulator(ScriptedProvider::fixed("x"));
        r.max_turns = 3;
        r.token_budget = 10;
        let history: Vec<Turn> = (0..6)
            .map(|i| Turn::user(format!("turn {i} abcd"), vec![]))
            .collect();
        // Each turn costs 3 tokens: three fit the budget.
        assert_eq!(r.history_window(&history).len(), 3);
        r.token_budget = 7;
        let window = r.history_window(&history);
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].text, "turn 5 abcd");

        r.token_budget = 1;
        assert_eq!(r.history_window(&history).len(), 1);
        assert!(r.history_window(&[]).is_empty());
    }
}
