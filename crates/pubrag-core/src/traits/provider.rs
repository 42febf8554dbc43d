//! Generation service trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Message, ProviderResponse};

/// Fixed sampling seed sent alongside deterministic requests.
pub const DETERMINISTIC_SEED: u64 = 7;

/// Decoding parameters for one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub seed: Option<u64>,
    /// Ask the service for a single JSON object.
    pub json_mode: bool,
}

impl GenerateParams {
    /// Greedy decoding: only the highest-probability continuation.
    pub fn deterministic(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            max_tokens,
            top_p: 1.0,
            seed: Some(DETERMINISTIC_SEED),
            json_mode: false,
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// A stateless text-completion service.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse>;

    async fn health_check(&self) -> Result<bool>;
}
