//! Core data model: models, messages, requests, results, token accounting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::fingerprint;
use crate::error::{ModelMuxError, Result};
use crate::llm::provider::SamplingParams;

/// Which backend family serves a given model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

/// Known model identifiers, each mapped to a provider.
///
/// The Groq identifiers are accepted at the type level but have no provider
/// mapping yet; selecting one fails with
/// [`UnsupportedModel`](ModelMuxError::UnsupportedModel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "o3-mini")]
    O3Mini,
    #[serde(rename = "claude-3.5-sonnet")]
    Claude35Sonnet,
    #[serde(rename = "claude-3.5-haiku")]
    Claude35Haiku,
    #[serde(rename = "groq-llama-3.3-70b")]
    GroqLlama33_70b,
    #[serde(rename = "groq-deepseek-r1-distilled-70b")]
    GroqDeepseekR1_70b,
}

impl ModelId {
    /// The wire-level model name passed to the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gpt4o => "gpt-4o",
            ModelId::Gpt4oMini => "gpt-4o-mini",
            ModelId::Gpt35Turbo => "gpt-3.5-turbo",
            ModelId::O3Mini => "o3-mini",
            ModelId::Claude35Sonnet => "claude-3-5-sonnet-latest",
            ModelId::Claude35Haiku => "claude-3-5-haiku-latest",
            ModelId::GroqLlama33_70b => "llama-3.3-70b-versatile",
            ModelId::GroqDeepseekR1_70b => "deepseek-r1-distill-llama-70b",
        }
    }

    /// Provider family serving this model, when one is mapped.
    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            ModelId::Gpt4o | ModelId::Gpt4oMini | ModelId::Gpt35Turbo | ModelId::O3Mini => {
                Some(ProviderKind::OpenAi)
            }
            ModelId::Claude35Sonnet | ModelId::Claude35Haiku => Some(ProviderKind::Anthropic),
            ModelId::GroqLlama33_70b | ModelId::GroqDeepseekR1_70b => None,
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation turn. Ordering is conversation order and is
/// preserved end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
        }
    }
}

/// A tool invocation requested by a provider response.
///
/// The id is generated locally when the provider omits one; each id is
/// consumed exactly once by the tool loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: HashMap<String, serde_json::Value>,
}

impl ToolInvocation {
    pub fn new(
        id: Option<String>,
        name: impl Into<String>,
        arguments: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: name.into(),
            arguments,
        }
    }
}

/// Token accounting for one generation. `total_tokens` is always the sum of
/// the two parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A generation request as accepted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: ModelId,
    pub user_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(flatten)]
    pub params: SamplingParams,
    /// Per-attempt deadline for provider calls.
    #[serde(default = "default_timeout", with = "timeout_secs")]
    pub timeout: Duration,
    /// Volatile correlation id; excluded from the cache fingerprint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

mod timeout_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Canonical projection of a request used as the cache key. Volatile fields
/// (timeout, request id) are deliberately absent.
#[derive(Serialize)]
struct RequestFingerprint<'a> {
    model: ModelId,
    user_prompt: &'a str,
    messages: &'a Option<Vec<ChatMessage>>,
    system_prompt: &'a Option<String>,
    params: &'a SamplingParams,
}

impl GenerationRequest {
    pub fn new(model: ModelId, user_prompt: impl Into<String>) -> Self {
        Self {
            model,
            user_prompt: user_prompt.into(),
            messages: None,
            system_prompt: None,
            params: SamplingParams::default(),
            timeout: DEFAULT_TIMEOUT,
            request_id: None,
        }
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Validate invariants before any provider is contacted.
    pub fn validate(&self) -> Result<()> {
        if self.user_prompt.trim().is_empty() {
            return Err(ModelMuxError::InvalidRequest(
                "user prompt must be non-empty".to_string(),
            ));
        }
        self.params.validate()
    }

    /// Stable cache key over the non-volatile request fields.
    pub fn fingerprint(&self) -> Result<String> {
        fingerprint(&RequestFingerprint {
            model: self.model,
            user_prompt: &self.user_prompt,
            messages: &self.messages,
            system_prompt: &self.system_prompt,
            params: &self.params,
        })
    }
}

/// The outcome of a successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub content: String,
    pub model: ModelId,
    pub usage: TokenUsage,
}
