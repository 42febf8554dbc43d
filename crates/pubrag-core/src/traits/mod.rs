//! Seams to the external services the core depends on.

pub mod provider;
pub mod search;

pub use provider::{GenerateParams, Provider};
pub use search::{Collection, IndexRecord, SearchFilter, SearchHit, SearchRequest, VectorSearch};
