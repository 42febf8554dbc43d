//! Provider registry — maps provider names to endpoint configurations.
//!
//! Every supported generation service speaks the OpenAI chat-completions
//! dialect; entries differ only by base URL, key lookup and auth style.

pub const CHAT_PATH: &str = "/chat/completions";
pub const MODELS_PATH: &str = "/models";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Local servers.
    None,
}

/// Endpoint description of one generation service.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: &'static str,
    pub base_url: &'static str,
    pub chat_path: &'static str,
    /// Probed by health checks on keyless servers.
    pub models_path: &'static str,
    /// API key variables, tried in order.
    pub env_keys: &'static [&'static str],
    pub auth_style: AuthStyle,
    /// Variable overriding `base_url`, e.g. `OLLAMA_HOST`.
    pub base_url_env: Option<&'static str>,
    /// Honours `response_format: json_object`.
    pub supports_json_mode: bool,
}

impl ProviderConfig {
    const fn hosted(name: &'static str, base_url: &'static str, env_keys: &'static [&'static str]) -> Self {
        Self {
            name,
            base_url,
            chat_path: CHAT_PATH,
            models_path: MODELS_PATH,
            env_keys,
            auth_style: AuthStyle::Bearer,
            base_url_env: None,
            supports_json_mode: true,
        }
    }

    const fn local(name: &'static str, base_url: &'static str, host_env: &'static str, json: bool) -> Self {
        Self {
            name,
            base_url,
            chat_path: CHAT_PATH,
            models_path: MODELS_PATH,
            env_keys: &[],
            auth_style: AuthStyle::None,
            base_url_env: Some(host_env),
            supports_json_mode: json,
        }
    }

    const fn with_base_url_env(mut self, var: &'static str) -> Self {
        self.base_url_env = Some(var);
        self
    }
}

static PROVIDERS: &[ProviderConfig] = &[
    ProviderConfig::hosted("openai", "https://api.openai.com/v1", &["OPENAI_API_KEY"])
        .with_base_url_env("OPENAI_API_BASE"),
    ProviderConfig::hosted("openrouter", "https://openrouter.ai/api/v1", &["OPENROUTER_API_KEY", "OPENAI_API_KEY"]),
    ProviderConfig::hosted("deepseek", "https://api.deepseek.com", &["DEEPSEEK_API_KEY"]),
    ProviderConfig::hosted(
        "gemini",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
    ),
    ProviderConfig::hosted("groq", "https://api.groq.com/openai/v1", &["GROQ_API_KEY"]),
    ProviderConfig::local("ollama", "http://localhost:11434/v1", "OLLAMA_HOST", true),
    // llama-server ignores response_format; the parser copes with prose.
    ProviderConfig::local("llamacpp", "http://localhost:8080/v1", "LLAMACPP_HOST", false),
];

/// Look up a provider by name or alias.
pub fn get_provider_config(name: &str) -> Option<&'static ProviderConfig> {
    let canonical = match name.trim().to_ascii_lowercase().as_str() {
        "google" => "gemini".to_string(),
        "llama.cpp" | "llama-cpp" => "llamacpp".to_string(),
        other => other.to_string(),
    };
    PROVIDERS.iter().find(|p| p.name == canonical)
}

pub fn all_provider_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|p| p.name).collect()
}
