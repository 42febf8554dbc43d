//! Unified OpenAI-compatible provider.
//!
//! A single struct that handles chat completions for every supported
//! generation service. Services differ only by endpoint URL, auth style and
//! API key.

use async_trait::async_trait;
use pubrag_core::config::LlmConfig;
use pubrag_core::error::{PubragError, Result};
use pubrag_core::traits::provider::{GenerateParams, Provider};
use pubrag_core::types::{Message, ProviderResponse, Usage};
use serde_json::{Value, json};

use crate::provider_registry::{AuthStyle, CHAT_PATH, MODELS_PATH, ProviderConfig};

/// Upper bound on a single HTTP exchange. Callers apply tighter deadlines.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// A unified provider that works with any OpenAI-compatible API.
pub struct OpenAiCompatibleProvider {
    /// Provider name (e.g., "openai", "groq", "deepseek").
    name: String,
    api_key: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    base_url: String,
    chat_path: String,
    models_path: String,
    auth_style: AuthStyle,
    /// Whether `response_format` may be sent.
    supports_json_mode: bool,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Create from a known provider config.
    ///
    /// Resolution order:
    /// - API key: `llm.api_key` > env vars > empty
    /// - Base URL: `llm.endpoint` > env override > registry default
    pub fn from_registry(registry: &ProviderConfig, llm: &LlmConfig) -> Result<Self> {
        let api_key = if !llm.api_key.is_empty() {
            llm.api_key.clone()
        } else {
            registry
                .env_keys
                .iter()
                .find_map(|key| std::env::var(key).ok())
                .unwrap_or_default()
        };

        let base_url = if !llm.endpoint.is_empty() {
            llm.endpoint.trim_end_matches('/').to_string()
        } else {
            registry
                .base_url_env
                .and_then(|env_key| {
                    let val = std::env::var(env_key).ok()?;
                    // OLLAMA_HOST / LLAMACPP_HOST usually omit the /v1 suffix
                    if val.ends_with("/v1") || env_key == "OPENAI_API_BASE" {
                        Some(val.trim_end_matches('/').to_string())
                    } else {
                        Some(format!("{}/v1", val.trim_end_matches('/')))
                    }
                })
                .unwrap_or_else(|| registry.base_url.to_string())
        };

        Ok(Self {
            name: registry.name.to_string(),
            api_key,
            base_url,
            chat_path: registry.chat_path.to_string(),
            models_path: registry.models_path.to_string(),
            auth_style: registry.auth_style,
            supports_json_mode: registry.supports_json_mode,
            client: build_client()?,
        })
    }

    /// Create for a custom endpoint (e.g., "custom:https://my-server.com/v1").
    pub fn custom(endpoint: &str, llm: &LlmConfig) -> Result<Self> {
        let base_url = endpoint
            .strip_prefix("custom:")
            .unwrap_or(endpoint)
            .trim_end_matches('/')
            .to_string();

        let api_key = if !llm.api_key.is_empty() {
            llm.api_key.clone()
        } else {
            std::env::var("CUSTOM_API_KEY").unwrap_or_default()
        };

        let auth_style = if api_key.is_empty() {
            AuthStyle::None
        } else {
            AuthStyle::Bearer
        };

        Ok(Self {
            name: "custom".to_string(),
            api_key,
            base_url,
            chat_path: CHAT_PATH.to_string(),
            models_path: MODELS_PATH.to_string(),
            auth_style,
            supports_json_mode: true,
            client: build_client()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the auth header for the request.
    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer if !self.api_key.is_empty() => {
                req.header("Authorization", format!("Bearer {}", self.api_key))
            }
            _ => req,
        }
    }

    /// Request body in the chat-completions format.
    fn request_body(&self, messages: &[Message], params: &GenerateParams) -> Value {
        let mut body = json!({
            "model": params.model,
            "messages": messages,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_tokens,
        });
        if let Some(seed) = params.seed {
            body["seed"] = json!(seed);
        }
        if params.json_mode && self.supports_json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(CLIENT_TIMEOUT_SECS))
        .build()
        .map_err(|e| PubragError::Http(format!("Failed to build HTTP client: {e}")))
}

/// Map a non-2xx status to an error class. Throttling and server faults are
/// transient; everything else is reported as a provider error.
fn status_error(name: &str, status: reqwest::StatusCode, text: &str) -> PubragError {
    if status.as_u16() == 429 {
        PubragError::RateLimited(format!("{name} API error {status}: {text}"))
    } else if status.is_server_error() {
        PubragError::Http(format!("{name} API error {status}: {text}"))
    } else {
        PubragError::Provider(format!("{name} API error {status}: {text}"))
    }
}

/// Parse a chat-completions response body.
fn parse_response(json: &Value) -> Result<ProviderResponse> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| PubragError::Provider("No choices in response".into()))?;

    let content = choice["message"]["content"].as_str().map(String::from);

    let usage = json["usage"].as_object().map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

    Ok(ProviderResponse {
        content,
        finish_reason: choice["finish_reason"].as_str().map(String::from),
        usage,
    })
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
        if self.auth_style != AuthStyle::None && self.api_key.is_empty() {
            return Err(PubragError::ApiKeyMissing(self.name.clone()));
        }

        let body = self.request_body(messages, params);
        let url = format!("{}{}", self.base_url, self.chat_path);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        let req = self.apply_auth(req);

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                PubragError::Timeout {
                    operation: format!("{} chat", self.name),
                    after_ms: CLIENT_TIMEOUT_SECS * 1000,
                }
            } else {
                PubragError::Http(format!("{} connection failed ({}): {}", self.name, url, e))
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(&self.name, status, &text));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| PubragError::Http(e.to_string()))?;
        let parsed = parse_response(&json)?;
        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                "{} tokens: prompt={} completion={}",
                self.name,
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }
        Ok(parsed)
    }

    async fn health_check(&self) -> Result<bool> {
        if self.auth_style != AuthStyle::None {
            // For cloud providers, just check if API key is set
            return Ok(!self.api_key.is_empty());
        }

        // For local servers (ollama, llamacpp), try to connect
        let url = format!("{}{}", self.base_url, self.models_path);
        let resp = self.client.get(&url).send().await;
        Ok(resp.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider_registry::get_provider_config;

    fn llm(api_key: &str, endpoint: &str) -> LlmConfig {
        LlmConfig {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_body_is_deterministic() {
        let registry = get_provider_config("openai").unwrap();
        let p = OpenAiCompatibleProvider::from_registry(registry, &llm("sk-test", "")).unwrap();
        let params = GenerateParams::deterministic("gpt-4o-mini", 256);
        let body = p.request_body(&[Message::user("hi")], &params);
        assert_eq!(body["temperature"], json!(0.0));
        assert_eq!(body["top_p"], json!(1.0));
        assert_eq!(body["seed"], json!(pubrag_core::traits::provider::DETERMINISTIC_SEED));
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("response_format").is_none());

        let body = p.request_body(&[Message::user("hi")], &params.with_json());
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_json_mode_skipped_when_unsupported() {
        let registry = get_provider_config("llamacpp").unwrap();
        let p = OpenAiCompatibleProvider::from_registry(registry, &llm("", "http://127.0.0.1:9/v1")).unwrap();
        let params = GenerateParams::deterministic("local", 64).with_json();
        let body = p.request_body(&[Message::user("hi")], &params);
        assert!(body.get("response_format").is_none());
        assert_eq!(p.base_url(), "http://127.0.0.1:9/v1");
    }

    #[test]
    fn test_custom_endpoint() {
        let p = OpenAiCompatibleProvider::custom("custom:https://llm.example.org/v1/", &llm("k", "")).unwrap();
        assert_eq!(p.name(), "custom");
        assert_eq!(p.base_url(), "https://llm.example.org/v1");
    }

    #[test]
    fn test_status_classification() {
        let e = status_error("openai", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(e, PubragError::RateLimited(_)));
        assert!(e.is_transient());
        let e = status_error("openai", reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(e.is_transient());
        let e = status_error("openai", reqwest::StatusCode::BAD_REQUEST, "bad");
        assert!(matches!(e, PubragError::Provider(_)));
        assert!(!e.is_transient());
    }

    #[test]
    fn test_parse_response() {
        let json = json!({
            "choices": [{"message": {"content": "Answer [PMID: 1]"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let r = parse_response(&json).unwrap();
        assert_eq!(r.content.as_deref(), Some("Answer [PMID: 1]"));
        assert_eq!(r.usage.map(|u| u.total_tokens), Some(15));
        assert!(parse_response(&json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn test_missing_key_is_reported() {
        let registry = get_provider_config("groq").unwrap();
        let mut p = OpenAiCompatibleProvider::from_registry(registry, &llm("", "")).unwrap();
        p.api_key.clear();
        let err = p
            .chat(&[Message::user("x")], &GenerateParams::deterministic("m", 8))
            .await
            .unwrap_err();
        assert!(matches!(err, PubragError::ApiKeyMissing(_)));
        assert!(!p.health_check().await.unwrap());
    }
}
