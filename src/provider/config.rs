//! Model profile configuration

use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f32 = 0.6;
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_REMOTE_URL: &str = "https://api.openai.com/v1";

/// Where a model runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local inference backend (Ollama)
    #[default]
    Local,
    /// OpenAI-compatible remote API
    Remote,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::Remote => "remote",
        }
    }
}

/// Resolved credentials for a remote backend
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// A configured backend model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    /// Unique id used for routing and `/use`
    pub id: String,
    pub provider: Provider,
    /// Model name as the backend knows it (e.g. "deepseek-r1:14b")
    pub backend_name: String,
    pub description: String,
    pub credentials: Option<Credentials>,
    pub base_url: Option<String>,
    pub is_default: bool,
    /// Whether this model emits `<think>` reasoning blocks
    pub reasoning: bool,
    pub temperature: f32,
}

impl ModelProfile {
    /// Create a local profile (mainly for tests and quick setups)
    pub fn local(id: impl Into<String>, backend_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: Provider::Local,
            backend_name: backend_name.into(),
            description: String::new(),
            credentials: None,
            base_url: None,
            is_default: false,
            reasoning: false,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Create a remote profile
    pub fn remote(
        id: impl Into<String>,
        backend_name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: Provider::Remote,
            backend_name: backend_name.into(),
            description: String::new(),
            credentials: api_key.map(|api_key| Credentials { api_key }),
            base_url: Some(base_url.into()),
            is_default: false,
            reasoning: false,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn with_reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Base URL, falling back to the provider's conventional endpoint
    pub fn endpoint(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, Provider::Local) => DEFAULT_OLLAMA_URL,
            (None, Provider::Remote) => DEFAULT_REMOTE_URL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_fallbacks() {
        let local = ModelProfile::local("r1", "deepseek-r1:14b");
        assert_eq!(local.endpoint(), DEFAULT_OLLAMA_URL);

        let remote = ModelProfile::remote("coder", "deepseek-chat", "https://api.deepseek.com/v1/", None);
        assert_eq!(remote.endpoint(), "https://api.deepseek.com/v1");
    }

    #[test]
    fn test_credentials_are_redacted() {
        let remote = ModelProfile::remote("c", "m", "http://x", Some("sk-secret".to_string()));
        let debug = format!("{:?}", remote);
        assert!(!debug.contains("sk-secret"));
    }
}
