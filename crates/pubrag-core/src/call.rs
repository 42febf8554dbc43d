//! Bounded external calls.
//!
//! Every call to the generation or search service runs under a deadline.
//! Transient failures (timeout, network fault, throttling) get one retry
//! after a jittered backoff; anything else is returned immediately so the
//! caller can take its component-specific fallback.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{PubragError, Result};

/// Deadline and retry budget for one kind of external call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn new(timeout: Duration, backoff: Duration) -> Self {
        Self { timeout, retries: 1, backoff }
    }

    /// Backoff before retry number `attempt` (1-based), with up to 25% jitter.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(attempt);
        let jitter_ms = (base.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Run `op` under `policy`. `op` is invoked again for the retry, so it must
/// build a fresh future each time.
pub async fn bounded<T, F, Fut>(operation: &str, policy: &CallPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(PubragError::timeout(operation, policy.timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.retries => {
                attempt += 1;
                let wait = policy.backoff_for(attempt);
                tracing::debug!("🔁 {operation}: {e}; retry {attempt} in {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}
