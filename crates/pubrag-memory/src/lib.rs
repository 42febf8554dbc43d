//! # PubRAG Memory
//!
//! Keyed, append-only conversation history.
//!
//! - One in-flight turn per session: callers take a [`SessionLease`] and
//!   hold it for the whole turn. Independent sessions never contend beyond
//!   the brief map lookup.
//! - Sessions idle longer than the TTL are evicted by [`SessionStore::evict_idle`]
//!   (or the background sweeper). A session with a lease outstanding, or a
//!   caller waiting for one, is never evicted.
//! - Unknown ids behave as fresh, empty sessions.

pub mod store;

pub use store::{Session, SessionLease, SessionStore};
