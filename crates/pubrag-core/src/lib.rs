//! # PubRAG Core
//!
//! Shared building blocks for the PubRAG workspace:
//! - **config** — TOML configuration with per-field defaults
//! - **error** — `PubragError` and the crate-wide `Result`
//! - **types** — turns, documents, chunks, candidate sets, citations
//! - **traits** — seams to the generation service and the vector search service
//! - **call** — bounded external calls (deadline + one retry with backoff)

pub mod call;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::PubragConfig;
pub use error::{PubragError, Result};
