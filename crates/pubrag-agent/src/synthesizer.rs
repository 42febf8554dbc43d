//! Grounded answer synthesis.
//!
//! Builds a bounded evidence block from the final chunks, asks the
//! generator for an answer restricted to that block, then audits the
//! answer's citations against the documents actually supplied.

use std::collections::HashMap;
use std::sync::Arc;

use pubrag_core::call::{CallPolicy, bounded};
use pubrag_core::config::PubragConfig;
use pubrag_core::traits::provider::{GenerateParams, Provider};
use pubrag_core::types::{Citation, Message, ScoredChunk, Turn};
use serde::{Deserialize, Serialize};

use crate::citation;
use crate::prompts::{self, SENTINEL};
use crate::text::safe_truncate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisOutcome {
    /// At least one citation of a supplied document survived the audit.
    Grounded,
    /// No evidence was supplied, or the generator answered with the sentinel.
    NoEvidence,
    /// Evidence was supplied but the answer cites none of it.
    Uncited,
    /// The generation call failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub outcome: SynthesisOutcome,
    /// Factual sentences of a grounded answer that carry no citation.
    pub uncited_sentences: usize,
}

impl Synthesis {
    pub fn sentinel(outcome: SynthesisOutcome) -> Self {
        Self {
            answer: SENTINEL.to_string(),
            citations: Vec::new(),
            outcome,
            uncited_sentences: 0,
        }
    }

    pub fn is_grounded(&self) -> bool {
        self.outcome == SynthesisOutcome::Grounded
    }
}

pub struct AnswerSynthesizer {
    provider: Arc<dyn Provider>,
    params: GenerateParams,
    policy: CallPolicy,
    context_budget: usize,
    tail_turns: usize,
    subject: String,
}

impl AnswerSynthesizer {
    pub fn new(provider: Arc<dyn Provider>, config: &PubragConfig) -> Self {
        Self {
            provider,
            params: GenerateParams::deterministic(&config.llm.model, config.llm.max_tokens),
            policy: config.timeouts.generate(),
            context_budget: config.synthesis.context_char_budget,
            tail_turns: config.synthesis.tail_turns,
            subject: config.synthesis.subject.clone(),
        }
    }

    /// Evidence block plus the citation label of every document it
    /// includes. Entries are added in rank order until the budget is spent;
    /// the first entry is always present, truncated if necessary.
    pub fn build_context(&self, chunks: &[ScoredChunk]) -> (String, HashMap<String, String>) {
        let mut context = String::new();
        let mut supplied = HashMap::new();

        for (i, scored) in chunks.iter().enumerate() {
            let chunk = &scored.chunk;
            let label = chunk.meta.citation_label();
            let header = match &label {
                Some(label) => format!("[{}] ({label}) [PMID: {}]", i + 1, chunk.doc_id),
                None => format!("[{}] [PMID: {}]", i + 1, chunk.doc_id),
            };
            let mut entry = header;
            if let Some(section) = chunk.section.as_deref().filter(|s| !s.trim().is_empty()) {
                entry.push_str(&format!("\nSECTION: {}", section.trim()));
            }
            entry.push_str(&format!("\nCONTENT: {}\n\n", chunk.text.trim()));

            if context.len() + entry.len() > self.context_budget {
                if context.is_empty() {
                    context.push_str(safe_truncate(&entry, self.context_budget));
                    supplied.insert(chunk.doc_id.clone(), label.unwrap_or_else(|| chunk.doc_id.clone()));
                }
                tracing::debug!("synthesizer: context budget reached at chunk {} of {}", i + 1, chunks.len());
                break;
            }
            context.push_str(&entry);
            supplied
                .entry(chunk.doc_id.clone())
                .or_insert_with(|| label.unwrap_or_else(|| chunk.doc_id.clone()));
        }
        (context.trim_end().to_string(), supplied)
    }

    /// Answer `question` from `chunks`. Never fails: a service fault or an
    /// empty evidence list yields the sentinel.
    pub async fn synthesize(&self, question: &str, chunks: &[ScoredChunk], history: &[Turn]) -> Synthesis {
        if chunks.is_empty() {
            tracing::warn!("⚠️ synthesizer: no evidence, answering with the sentinel");
            return Synthesis::sentinel(SynthesisOutcome::NoEvidence);
        }

        let (context, supplied) = self.build_context(chunks);
        let mut messages = vec![Message::system(prompts::synthesis_prompt(&self.subject, &context))];
        let tail = history.len().saturating_sub(self.tail_turns);
        messages.extend(history[tail..].iter().map(Turn::to_message));
        messages.push(Message::user(question));

        let result = bounded("answer generation", &self.policy, || {
            self.provider.chat(&messages, &self.params)
        })
        .await;
        let answer = match result {
            Ok(resp) => resp.content.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("⚠️ synthesizer: {e}; answering with the sentinel");
                return Synthesis::sentinel(SynthesisOutcome::Failed);
            }
        };
        let answer = answer.trim();
        if answer.is_empty() {
            tracing::warn!("⚠️ synthesizer: empty answer, answering with the sentinel");
            return Synthesis::sentinel(SynthesisOutcome::Failed);
        }
        if prompts::is_sentinel(answer) {
            tracing::info!("📭 synthesizer: generator reported insufficient evidence");
            return Synthesis::sentinel(SynthesisOutcome::NoEvidence);
        }

        let audit = citation::audit(answer, &supplied);
        if !audit.stripped.is_empty() {
            tracing::warn!("⚠️ synthesizer: stripped citations of unsupplied documents {:?}", audit.stripped);
        }
        if audit.citations.is_empty() {
            tracing::warn!("⚠️ synthesizer: answer cites none of the {} supplied documents", supplied.len());
            return Synthesis {
                answer: audit.text,
                citations: Vec::new(),
                outcome: SynthesisOutcome::Uncited,
                uncited_sentences: audit.uncited_sentences,
            };
        }
        if audit.uncited_sentences > 0 {
            tracing::warn!("⚠️ synthesizer: {} sentences without a citation", audit.uncited_sentences);
        }

        tracing::info!("📝 synthesized answer citing {} documents", audit.citations.len());
        Synthesis {
            answer: audit.text,
            citations: audit.citations,
            outcome: SynthesisOutcome::Grounded,
            uncited_sentences: audit.uncited_sentences,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubrag_core::testing::{ScriptedProvider, system_prompt};
    use pubrag_core::types::{Chunk, DocMeta};

    fn scored(doc: &str, author: Option<&str>, year: Option<i32>, text: &str) -> ScoredChunk {
        ScoredChunk::new(
            Chunk {
                doc_id: doc.into(),
                section: Some("Results".into()),
                text: text.into(),
                meta: DocMeta {
                    first_author: author.map(String::from),
                    year,
                    ..Default::default()
                },
            },
            0.8,
            0,
        )
    }

    fn synthesizer(provider: ScriptedProvider) -> (Arc<ScriptedProvider>, AnswerSynthesizer) {
        let provider = Arc::new(provider);
        let mut config = PubragConfig::default();
        config.timeouts.retry_backoff_ms = 1;
        (provider.clone(), AnswerSynthesizer::new(provider, &config))
    }

    #[test]
    fn test_context_headers_degrade_gracefully() {
        let (_, s) = synthesizer(ScriptedProvider::fixed("x"));
        let (context, supplied) = s.build_context(&[
            scored("111", Some("Smith"), Some(2022), "Bevacizumab lowered ESS."),
            scored("222", None, Some(2019), "Tranexamic acid was tested."),
            scored("333", None, None, "No metadata here."),
        ]);
        assert!(context.starts_with("[1] (Smith, 2022) [PMID: 111]\nSECTION: Results\nCONTENT: Bevacizumab"));
        assert!(context.contains("[2] (2019) [PMID: 222]"));
        assert!(context.contains("[3] [PMID: 333]"));
        assert_eq!(supplied.get("111").map(String::as_str), Some("Smith, 2022"));
        assert_eq!(supplied.get("333").map(String::as_str), Some("333"));
    }

    #[test]
    fn test_context_respects_budget() {
        let (_, mut s) = synthesizer(ScriptedProvider::fixed("x"));
        s.context_budget = 120;
        let chunks: Vec<_> = (0..5)
            .map(|i| scored(&format!("{i}00"), Some("Lee"), Some(2020), &"evidence ".repeat(6)))
            .collect();
        let (context, supplied) = s.build_context(&chunks);
        assert!(context.len() <= 120);
        assert_eq!(supplied.len(), 1);

        s.context_budget = 20;
        let (context, supplied) = s.build_context(&chunks);
        assert!(!context.is_empty() && context.len() <= 20);
        assert!(supplied.contains_key("000"));
    }

    #[tokio::test]
    async fn test_no_chunks_yields_sentinel_without_call() {
        let (provider, s) = synthesizer(ScriptedProvider::fixed("Bevacizumab works."));
        let out = s.synthesize("Does bevacizumab work?", &[], &[]).await;
        assert_eq!(out.answer, SENTINEL);
        assert_eq!(out.outcome, SynthesisOutcome::NoEvidence);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_keeps_supplied_citations_only() {
        let (provider, s) = synthesizer(ScriptedProvider::new(|messages, _| {
            assert!(system_prompt(messages).contains("[PMID: 111]"));
            Ok("Bevacizumab reduced epistaxis severity (Smith, 2022) [PMID: 111]. \
                It also reduced transfusions [PMID: 999]."
                .into())
        }));
        let history = vec![
            Turn::user("q1", vec![]),
            Turn::assistant("a1", vec![]),
            Turn::user("q2", vec![]),
            Turn::assistant("a2", vec![]),
            Turn::user("q3", vec![]),
            Turn::assistant("a3", vec![]),
        ];
        let out = s
            .synthesize("Does bevacizumab work?", &[scored("111", Some("Smith"), Some(2022), "ESS fell.")], &history)
            .await;
        assert_eq!(out.outcome, SynthesisOutcome::Grounded);
        assert_eq!(out.citations, vec![Citation { doc_id: "111".into(), label: "Smith, 2022".into() }]);
        assert!(!out.answer.contains("999"));

        let (messages, params) = &provider.requests()[0];
        // System prompt, the last four turns, then the question.
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[1].content, "q2");
        assert_eq!(params.temperature, 0.0);
        assert!(!params.json_mode);
    }

    #[tokio::test]
    async fn test_partially_cited_answer_reports_uncited_sentences() {
        let (_, s) = synthesizer(ScriptedProvider::fixed(
            "Bevacizumab reduced epistaxis severity [PMID: 111]. \
             Most patients tolerated the infusions without any trouble.",
        ));
        let out = s
            .synthesize("Does it help?", &[scored("111", Some("Smith"), Some(2022), "ESS fell.")], &[])
            .await;
        assert_eq!(out.outcome, SynthesisOutcome::Grounded);
        assert_eq!(out.uncited_sentences, 1);
    }

    #[tokio::test]
    async fn test_uncited_answer_is_flagged() {
        let (_, s) = synthesizer(ScriptedProvider::fixed("Bevacizumab probably helps most patients a lot."));
        let out = s
            .synthesize("Does it help?", &[scored("111", Some("Smith"), Some(2022), "ESS fell.")], &[])
            .await;
        assert_eq!(out.outcome, SynthesisOutcome::Uncited);
        assert!(out.citations.is_empty());
    }

    #[tokio::test]
    async fn test_generator_sentinel_and_failure() {
        let (_, s) = synthesizer(ScriptedProvider::fixed(&format!("{SENTINEL}\n")));
        let chunks = [scored("111", None, None, "unrelated")];
        let out = s.synthesize("q", &chunks, &[]).await;
        assert_eq!(out.outcome, SynthesisOutcome::NoEvidence);
        assert_eq!(out.answer, SENTINEL);

        let (provider, s) = synthesizer(ScriptedProvider::unreachable());
        let out = s.synthesize("q", &chunks, &[]).await;
        assert_eq!(out.outcome, SynthesisOutcome::Failed);
        assert_eq!(out.answer, SENTINEL);
        assert_eq!(provider.call_count(), 2);
    }
}
