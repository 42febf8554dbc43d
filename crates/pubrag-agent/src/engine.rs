//! Per-turn orchestration.
//!
//! One turn walks `NEW_QUERY → REFORMULATING → PARSING → {CLARIFYING |
//! RETRIEVING} → RERANKING → DIVERSIFYING → SYNTHESIZING → DONE` while it
//! holds the session's lease, so turns of one session run strictly in
//! arrival order. The exchange is committed only after a final response
//! exists; a turn dropped midway leaves the session untouched.

use std::sync::Arc;

use pubrag_core::config::PubragConfig;
use pubrag_core::error::{PubragError, Result};
use pubrag_core::traits::provider::Provider;
use pubrag_core::traits::search::VectorSearch;
use pubrag_core::types::{Citation, Turn, TurnRole};
use pubrag_memory::SessionStore;
use pubrag_retrieval::{DiversityFilter, RetrievalPath, Reranker, Retriever};
use serde::{Deserialize, Serialize};

use crate::parser::{ParsedQuery, QueryParser};
use crate::prompts;
use crate::reformulate::QueryReformulator;
use crate::synthesizer::{AnswerSynthesizer, Synthesis, SynthesisOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    NewQuery,
    Reformulating,
    Parsing,
    Clarifying,
    Retrieving,
    Reranking,
    Diversifying,
    Synthesizing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Answer,
    Clarification,
    NoEvidence,
}

/// Final response of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub kind: ResponseKind,
    /// States visited, in order. Retrieval states repeat on a retry.
    pub trace: Vec<TurnState>,
    /// Path of the retrieval that produced the answer; `None` for a
    /// clarification.
    pub retrieval_path: Option<RetrievalPath>,
    pub standalone_query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generation: bool,
    pub search: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.generation && self.search
    }
}

pub struct ChatEngine {
    sessions: Arc<SessionStore>,
    provider: Arc<dyn Provider>,
    search: Arc<dyn VectorSearch>,
    reformulator: QueryReformulator,
    parser: QueryParser,
    retriever: Retriever,
    reranker: Reranker,
    diversity: DiversityFilter,
    synthesizer: AnswerSynthesizer,
}

impl ChatEngine {
    pub fn new(config: &PubragConfig, provider: Arc<dyn Provider>, search: Arc<dyn VectorSearch>) -> Self {
        Self {
            sessions: Arc::new(SessionStore::from_config(&config.session)),
            reformulator: QueryReformulator::new(provider.clone(), config),
            parser: QueryParser::new(provider.clone(), config),
            retriever: Retriever::new(search.clone(), config.retrieval.clone(), config.timeouts.search()),
            reranker: Reranker::from_clock(config.rerank.clone()),
            diversity: DiversityFilter::from_config(&config.retrieval),
            synthesizer: AnswerSynthesizer::new(provider.clone(), config),
            provider,
            search,
        }
    }

    /// Share a session store (and its sweeper) with other engines.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run one turn. Fails only on empty input; every service fault maps to
    /// a degraded response.
    pub async fn chat(&self, session_id: &str, text: &str) -> Result<ChatResponse> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PubragError::InvalidInput("query text is empty".into()));
        }

        let lease = self.sessions.acquire(session_id).await;
        let history = lease.history().to_vec();
        let mut trace = vec![TurnState::NewQuery];

        // A sentinel last turn means the constrained path already missed.
        let retry_requested = history
            .last()
            .is_some_and(|t| t.role == TurnRole::Assistant && prompts::is_sentinel(&t.text));

        trace.push(TurnState::Reformulating);
        let reformulation = self.reformulator.reformulate(text, &history).await;

        trace.push(TurnState::Parsing);
        let parsed = self
            .parser
            .parse(&reformulation.standalone_query, &reformulation.referenced_doc_ids)
            .await;

        let user_turn = Turn::user(text, reformulation.referenced_doc_ids.clone());

        if let Some(question) = parsed.clarification.clone() {
            trace.push(TurnState::Clarifying);
            trace.push(TurnState::Done);
            lease.commit(user_turn, Turn::assistant(question.clone(), Vec::new()));
            return Ok(ChatResponse {
                answer: question,
                citations: Vec::new(),
                kind: ResponseKind::Clarification,
                trace,
                retrieval_path: None,
                standalone_query: reformulation.standalone_query,
            });
        }

        let (synthesis, path) = self
            .ground(&reformulation.standalone_query, &parsed, &history, retry_requested, &mut trace)
            .await;
        let synthesis = match synthesis.outcome {
            SynthesisOutcome::Grounded => synthesis,
            SynthesisOutcome::Uncited => {
                tracing::warn!("⚠️ engine: answer still uncited after fallback, using the sentinel");
                Synthesis::sentinel(SynthesisOutcome::NoEvidence)
            }
            _ => Synthesis::sentinel(synthesis.outcome),
        };
        trace.push(TurnState::Done);

        let kind = if synthesis.is_grounded() {
            ResponseKind::Answer
        } else {
            ResponseKind::NoEvidence
        };
        let cited: Vec<String> = synthesis.citations.iter().map(|c| c.doc_id.clone()).collect();
        lease.commit(user_turn, Turn::assistant(synthesis.answer.clone(), cited));

        tracing::info!("✅ session {session_id}: {kind:?} via {path:?}");
        Ok(ChatResponse {
            answer: synthesis.answer,
            citations: synthesis.citations,
            kind,
            trace,
            retrieval_path: Some(path),
            standalone_query: reformulation.standalone_query,
        })
    }

    /// Retrieve, rerank, diversify and synthesize. A constrained retrieval
    /// that yields no evidence, or an answer citing none of it, is retried
    /// once over the global body search.
    async fn ground(
        &self,
        question: &str,
        parsed: &ParsedQuery,
        history: &[Turn],
        force_fallback: bool,
        trace: &mut Vec<TurnState>,
    ) -> (Synthesis, RetrievalPath) {
        let mut force = force_fallback;
        loop {
            trace.push(TurnState::Retrieving);
            let retrieval = self.retriever.retrieve(&parsed.search_query, &parsed.filters, force).await;
            let can_retry = !retrieval.path.is_fallback();

            trace.push(TurnState::Reranking);
            let ranked = self.reranker.rerank(retrieval.chunks);

            trace.push(TurnState::Diversifying);
            let evidence = self.diversity.apply(ranked);

            if evidence.is_empty() && can_retry {
                tracing::warn!("⚠️ engine: constrained retrieval produced no evidence, retrying globally");
                force = true;
                continue;
            }

            trace.push(TurnState::Synthesizing);
            let synthesis = self.synthesizer.synthesize(question, &evidence, history).await;
            if synthesis.outcome == SynthesisOutcome::Uncited && can_retry {
                tracing::warn!("⚠️ engine: uncited answer, retrying with global retrieval");
                force = true;
                continue;
            }
            return (synthesis, retrieval.path);
        }
    }

    /// Drop a session's history.
    pub async fn clear(&self, session_id: &str) {
        self.sessions.clear(session_id).await;
    }

    /// Probe both services concurrently.
    pub async fn health(&self) -> HealthReport {
        let (generation, search) = tokio::join!(self.provider.health_check(), self.search.health_check());
        let report = HealthReport {
            generation: generation.unwrap_or(false),
            search: search.unwrap_or(false),
        };
        if !report.is_healthy() {
            tracing::warn!("⚠️ health: {report:?}");
        }
        report
    }
}
