//! Session store with per-session exclusion and TTL eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pubrag_core::config::SessionConfig;
use pubrag_core::types::Turn;
use tokio::sync::OwnedMutexGuard;

/// One conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

struct SessionSlot {
    session: Arc<tokio::sync::Mutex<Session>>,
    /// Leases held plus callers waiting for one.
    in_flight: AtomicUsize,
    /// Unix millis of the last lease release.
    last_activity: AtomicI64,
}

impl SessionSlot {
    fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            session: Arc::new(tokio::sync::Mutex::new(Session {
                id: id.to_string(),
                turns: Vec::new(),
                created_at: now,
            })),
            in_flight: AtomicUsize::new(0),
            last_activity: AtomicI64::new(now.timestamp_millis()),
        }
    }

    fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

/// Marks a slot busy from before the lock is awaited until the lease is
/// released, including when the waiting future is dropped.
struct InFlight(Arc<SessionSlot>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Exclusive access to one session for the duration of a turn.
pub struct SessionLease {
    guard: OwnedMutexGuard<Session>,
    _in_flight: InFlight,
}

impl SessionLease {
    pub fn session_id(&self) -> &str {
        &self.guard.id
    }

    /// Committed turns, oldest first.
    pub fn history(&self) -> &[Turn] {
        &self.guard.turns
    }

    pub fn append(&mut self, turn: Turn) {
        self.guard.turns.push(turn);
    }

    /// Append a completed exchange in one step and release the session.
    pub fn commit(mut self, user: Turn, assistant: Turn) {
        self.guard.turns.push(user);
        self.guard.turns.push(assistant);
        tracing::debug!(
            "session {}: committed turn ({} turns)",
            self.guard.id,
            self.guard.turns.len()
        );
    }

    pub fn clear(&mut self) {
        self.guard.turns.clear();
    }
}

/// Keyed conversation store.
pub struct SessionStore {
    slots: Mutex<HashMap<String, Arc<SessionSlot>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.ttl())
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionSlot>>> {
        // A panic while holding the map lock cannot leave the map torn.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for exclusive access to `session_id`, creating it if unseen.
    pub async fn acquire(&self, session_id: &str) -> SessionLease {
        let in_flight = {
            let mut slots = self.lock_slots();
            let slot = slots
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    tracing::debug!("session {session_id}: created");
                    Arc::new(SessionSlot::new(session_id))
                })
                .clone();
            slot.in_flight.fetch_add(1, Ordering::AcqRel);
            InFlight(slot)
        };
        let guard = in_flight.0.session.clone().lock_owned().await;
        SessionLease {
            guard,
            _in_flight: in_flight,
        }
    }

    /// Committed turns for `session_id`; empty if unseen.
    pub async fn get(&self, session_id: &str) -> Vec<Turn> {
        if !self.contains(session_id) {
            return Vec::new();
        }
        self.acquire(session_id).await.history().to_vec()
    }

    pub async fn append(&self, session_id: &str, turn: Turn) {
        let mut lease = self.acquire(session_id).await;
        lease.append(turn);
    }

    /// Drop a session's history, keeping the id live.
    pub async fn clear(&self, session_id: &str) {
        if !self.contains(session_id) {
            return;
        }
        let mut lease = self.acquire(session_id).await;
        lease.clear();
        tracing::info!("🧹 session {session_id}: history cleared");
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock_slots().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict sessions idle for longer than the TTL as of `now`. Sessions
    /// that are in use are kept and reconsidered on the next sweep.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let ttl_ms = self.ttl.as_millis() as i64;
        let now_ms = now.timestamp_millis();
        let mut slots = self.lock_slots();
        let before = slots.len();
        slots.retain(|id, slot| {
            if slot.in_flight.load(Ordering::Acquire) > 0 {
                return true;
            }
            let idle = now_ms - slot.last_activity.load(Ordering::Relaxed);
            let keep = idle <= ttl_ms;
            if !keep {
                tracing::debug!("session {id}: evicted after {idle}ms idle");
            }
            keep
        });
        before - slots.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until the
    /// returned handle is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.evict_idle(Utc::now());
                if evicted > 0 {
                    tracing::info!("🧹 Evicted {evicted} idle sessions");
                }
            }
        })
    }
}
