//! Model clients
//!
//! Two backends behind one trait:
//! - `RemoteClient`: OpenAI-compatible `/chat/completions`
//! - `LocalClient`: Ollama `/api/chat`
//!
//! Both are non-streaming. Reasoning returned out-of-band (`reasoning_content`
//! or Ollama's `thinking`) is folded back into the content as a `<think>`
//! block so the rest of the system handles every reasoning model the same way.

use super::{ModelProfile, Provider};
use crate::directive::{THINK_END, THINK_START};
use crate::message::{Message, Role};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Failed to build request: {0}")]
    Request(String),
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("model '{0}' did not respond within {1}s")]
    Timeout(String, u64),
}

/// A long-lived, shareable model client: `invoke(messages) -> message`
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send the ordered conversation and return the assistant reply
    async fn invoke(&self, messages: &[Message]) -> Result<Message, ModelError>;
}

/// Builds clients for profiles. The router caches whatever this returns.
pub trait ClientFactory: Send + Sync {
    fn build(&self, profile: &ModelProfile) -> Result<Arc<dyn ModelClient>, ModelError>;
}

/// Factory for the real HTTP backends
#[derive(Debug, Default, Clone)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn build(&self, profile: &ModelProfile) -> Result<Arc<dyn ModelClient>, ModelError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| ModelError::Request(format!("Failed to build HTTP client: {}", e)))?;

        let client: Arc<dyn ModelClient> = match profile.provider {
            Provider::Remote => Arc::new(RemoteClient {
                profile: profile.clone(),
                http_client,
            }),
            Provider::Local => Arc::new(LocalClient {
                profile: profile.clone(),
                http_client,
            }),
        };
        tracing::info!(
            model = %profile.id,
            provider = profile.provider.as_str(),
            backend = %profile.backend_name,
            "Model client constructed"
        );
        Ok(client)
    }
}

/// Join out-of-band reasoning back into the visible content
fn fold_reasoning(reasoning: Option<String>, content: String) -> String {
    match reasoning {
        Some(r) if !r.trim().is_empty() && !content.contains(THINK_START) => {
            format!("{}{}{}\n{}", THINK_START, r, THINK_END, content)
        }
        _ => content,
    }
}

// Internal types for parsing OpenAI-compatible responses
#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

/// OpenAI-compatible client (DeepSeek, SiliconFlow, OpenAI, LM Studio...)
pub struct RemoteClient {
    profile: ModelProfile,
    http_client: reqwest::Client,
}

impl RemoteClient {
    fn to_request(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, ModelError> {
        messages
            .iter()
            .map(|m| {
                let built: ChatCompletionRequestMessage = match m.role {
                    Role::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| ModelError::Request(e.to_string()))?
                        .into(),
                    Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| ModelError::Request(e.to_string()))?
                        .into(),
                    // Observations go back to the model as user turns
                    Role::User | Role::Observation => ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| ModelError::Request(e.to_string()))?
                        .into(),
                };
                Ok(built)
            })
            .collect()
    }
}

#[async_trait]
impl ModelClient for RemoteClient {
    async fn invoke(&self, messages: &[Message]) -> Result<Message, ModelError> {
        let request_messages = Self::to_request(messages)?;
        let body = serde_json::json!({
            "model": self.profile.backend_name,
            "messages": request_messages,
            "temperature": self.profile.temperature,
            "stream": false,
        });

        let mut request = self
            .http_client
            .post(format!("{}/chat/completions", self.profile.endpoint()))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(creds) = &self.profile.credentials {
            request = request.header("Authorization", format!("Bearer {}", creds.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ModelError::Request(format!("API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Decode("response has no choices".to_string()))?;

        let content = fold_reasoning(
            choice.message.reasoning_content,
            choice.message.content.unwrap_or_default(),
        );
        Ok(Message::assistant(content, self.profile.id.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

/// Ollama client for locally hosted models
pub struct LocalClient {
    profile: ModelProfile,
    http_client: reqwest::Client,
}

#[async_trait]
impl ModelClient for LocalClient {
    async fn invoke(&self, messages: &[Message]) -> Result<Message, ModelError> {
        let wire: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Observation => "user",
                    other => other.as_str(),
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.profile.backend_name,
            "messages": wire,
            "stream": false,
            "options": { "temperature": self.profile.temperature },
        });

        let response = self
            .http_client
            .post(format!("{}/api/chat", self.profile.endpoint()))
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Request(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;

        let content = fold_reasoning(parsed.message.thinking, parsed.message.content);
        Ok(Message::assistant(content, self.profile.id.clone()))
    }
}
