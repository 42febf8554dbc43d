//! Failover chain over several generation services.
//!
//! Members are tried in order. A member that fails `max_failures` times in a
//! row is benched for `cooldown`, then given another chance.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pubrag_core::error::{PubragError, Result};
use pubrag_core::traits::provider::{GenerateParams, Provider};
use pubrag_core::types::{Message, ProviderResponse};

const DEFAULT_MAX_FAILURES: u32 = 3;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone, Copy)]
struct Strikes {
    consecutive: u32,
    last: Option<Instant>,
}

struct Member {
    provider: Box<dyn Provider>,
    strikes: Mutex<Strikes>,
}

impl Member {
    fn strikes(&self) -> Strikes {
        self.strikes.lock().map(|s| *s).unwrap_or_default()
    }

    fn update(&self, f: impl FnOnce(&mut Strikes)) {
        if let Ok(mut s) = self.strikes.lock() {
            f(&mut s);
        }
    }
}

pub struct FailoverProvider {
    members: Vec<Member>,
    max_failures: u32,
    cooldown: Duration,
}

impl FailoverProvider {
    /// The first provider is the primary; the rest are fallbacks in order.
    pub fn new(providers: Vec<Box<dyn Provider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(PubragError::Config("failover chain needs at least one provider".into()));
        }
        Ok(Self {
            members: providers
                .into_iter()
                .map(|provider| Member { provider, strikes: Mutex::new(Strikes::default()) })
                .collect(),
            max_failures: DEFAULT_MAX_FAILURES,
            cooldown: DEFAULT_COOLDOWN,
        })
    }

    pub fn with_policy(mut self, max_failures: u32, cooldown: Duration) -> Self {
        self.max_failures = max_failures.max(1);
        self.cooldown = cooldown;
        self
    }

    pub fn chain_len(&self) -> usize {
        self.members.len()
    }

    fn benched_at(&self, member: &Member, now: Instant) -> bool {
        let s = member.strikes();
        s.consecutive >= self.max_failures
            && s.last.is_some_and(|t| now.saturating_duration_since(t) < self.cooldown)
    }
}

#[async_trait]
impl Provider for FailoverProvider {
    fn name(&self) -> &str {
        self.members.first().map(|m| m.provider.name()).unwrap_or("failover")
    }

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
        let mut last_error = None;

        for (idx, member) in self.members.iter().enumerate() {
            let name = member.provider.name();
            if self.benched_at(member, Instant::now()) {
                tracing::debug!("⏭️ failover: {name} benched");
                continue;
            }
            match member.provider.chat(messages, params).await {
                Ok(response) => {
                    member.update(|s| s.consecutive = 0);
                    if idx > 0 {
                        tracing::info!("🔄 failover: answered by {name}");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    member.update(|s| {
                        s.consecutive += 1;
                        s.last = Some(Instant::now());
                    });
                    tracing::warn!("⚠️ failover: {name} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        // Keep the last error's class so the caller's retry policy still
        // sees transient faults.
        Err(last_error.unwrap_or_else(|| PubragError::Http("every provider in the chain is benched".into())))
    }

    async fn health_check(&self) -> Result<bool> {
        let now = Instant::now();
        for member in &self.members {
            if self.benched_at(member, now) {
                continue;
            }
            if let Ok(true) = member.provider.health_check().await {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubrag_core::testing::ScriptedProvider;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params() -> GenerateParams {
        GenerateParams::deterministic("m", 16)
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        assert!(FailoverProvider::new(vec![]).is_err());
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let chain = FailoverProvider::new(vec![
            Box::new(ScriptedProvider::unreachable()),
            Box::new(ScriptedProvider::fixed("from fallback")),
        ])
        .unwrap();
        let resp = chain.chat(&[Message::user("q")], &params()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("from fallback"));
        assert_eq!(chain.members[0].strikes().consecutive, 1);
        assert_eq!(chain.members[1].strikes().consecutive, 0);
        assert_eq!(chain.name(), "scripted");
    }

    #[tokio::test]
    async fn test_failing_member_is_benched_until_cooldown() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let counter = primary_calls.clone();
        let primary = ScriptedProvider::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(PubragError::Http("down".into()))
        });
        let chain = FailoverProvider::new(vec![Box::new(primary), Box::new(ScriptedProvider::fixed("ok"))])
            .unwrap()
            .with_policy(2, Duration::from_secs(60));

        for _ in 0..4 {
            chain.chat(&[Message::user("q")], &params()).await.unwrap();
        }
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);

        let later = Instant::now() + Duration::from_secs(61);
        assert!(!chain.benched_at(&chain.members[0], later));
    }

    #[tokio::test]
    async fn test_all_failed_returns_last_error() {
        let chain = FailoverProvider::new(vec![
            Box::new(ScriptedProvider::unreachable()),
            Box::new(ScriptedProvider::unreachable()),
        ])
        .unwrap();
        let err = chain.chat(&[Message::user("q")], &params()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(chain.chain_len(), 2);
    }
}
