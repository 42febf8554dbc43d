//! Scripted service doubles for tests across the workspace.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{PubragError, Result};
use crate::traits::provider::{GenerateParams, Provider};
use crate::types::{Message, ProviderResponse};

type Handler = Box<dyn Fn(&[Message], &GenerateParams) -> Result<String> + Send + Sync>;

/// A generation provider whose replies come from a closure.
pub struct ScriptedProvider {
    name: String,
    handler: Handler,
    delay: Option<Duration>,
    requests: Mutex<Vec<(Vec<Message>, GenerateParams)>>,
}

impl ScriptedProvider {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[Message], &GenerateParams) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: "scripted".into(),
            handler: Box::new(handler),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always replies with `text`.
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    /// Always fails with a transient network error.
    pub fn unreachable() -> Self {
        Self::new(|_, _| Err(PubragError::Http("connection refused".into())))
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<(Vec<Message>, GenerateParams)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
        if let Ok(mut log) = self.requests.lock() {
            log.push((messages.to_vec(), params.clone()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = (self.handler)(messages, params)?;
        Ok(ProviderResponse {
            content: Some(content),
            finish_reason: Some("stop".into()),
            usage: None,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Text of the first system message, or empty.
pub fn system_prompt(messages: &[Message]) -> &str {
    messages
        .iter()
        .find(|m| m.role == crate::types::Role::System)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Text of the last message.
pub fn last_message(messages: &[Message]) -> &str {
    messages.last().map(|m| m.content.as_str()).unwrap_or("")
}
