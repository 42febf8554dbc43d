//! # PubRAG Agent
//!
//! The per-turn conversational pipeline:
//!
//! ```text
//! user text ─► QueryReformulator ─► QueryParser ─┬─► clarification (turn ends)
//!                                                └─► Retriever ─► Reranker ─► DiversityFilter
//!                                                        ─► AnswerSynthesizer ─► commit turn
//! ```
//!
//! [`ChatEngine`] drives it for one session at a time and commits the
//! exchange to the session store only once a final response exists.

pub mod citation;
pub mod engine;
pub mod parser;
pub mod prompts;
pub mod reformulate;
pub mod synthesizer;
mod text;

pub use engine::{ChatEngine, ChatResponse, HealthReport, ResponseKind, TurnState};
pub use parser::{ParsedQuery, QueryParser};
pub use reformulate::{QueryReformulator, Reformulation};
pub use synthesizer::{AnswerSynthesizer, Synthesis, SynthesisOutcome};
