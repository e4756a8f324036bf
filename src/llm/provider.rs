//! Provider abstraction: the capability set every backend implements.
//!
//! Providers differ only in wire format. The orchestrator selects one via
//! the model identifier and is otherwise provider-agnostic; all wire-level
//! failures surface as one of the categorized upstream errors.

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::{ModelMuxError, Result};
use crate::llm::models::ChatMessage;
use crate::llm::tools::ToolDescriptor;

/// Sampling parameters shared by all providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: None,
        }
    }
}

impl SamplingParams {
    /// Range checks: temperature and top_p in [0, 1], penalties in [0, 2].
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ModelMuxError::InvalidRequest(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ModelMuxError::InvalidRequest(format!(
                "top_p must be within [0, 1], got {}",
                self.top_p
            )));
        }
        if !(0.0..=2.0).contains(&self.frequency_penalty) {
            return Err(ModelMuxError::InvalidRequest(format!(
                "frequency_penalty must be within [0, 2], got {}",
                self.frequency_penalty
            )));
        }
        if !(0.0..=2.0).contains(&self.presence_penalty) {
            return Err(ModelMuxError::InvalidRequest(format!(
                "presence_penalty must be within [0, 2], got {}",
                self.presence_penalty
            )));
        }
        Ok(())
    }
}

/// Result of a one-shot completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: usize,
}

/// Result of a chat call, possibly carrying tool-invocation requests.
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub reply: String,
    pub tool_calls: Vec<crate::llm::models::ToolInvocation>,
}

/// One streamed text delta.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDelta {
    pub delta: String,
}

/// Boxed stream of text deltas from a provider.
pub type DeltaStream<'a> = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send + 'a>>;

/// Capability set implemented by every concrete backend.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// One-shot text completion from a raw prompt.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: usize,
        params: &SamplingParams,
    ) -> Result<Completion>;

    /// Multi-turn chat. When `tools` is given, the provider advertises them
    /// with automatic tool choice and may return tool-invocation requests.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDescriptor]>,
        params: &SamplingParams,
    ) -> Result<ChatReply>;

    /// Lazily streamed chat deltas. Dropping the stream releases the
    /// underlying connection.
    fn stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
        params: &'a SamplingParams,
    ) -> DeltaStream<'a>;

    /// Embedding vectors for a batch of texts.
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>>;
}

/// Map a transport-level failure onto the upstream error taxonomy.
pub(crate) fn categorize_transport_error(err: reqwest::Error) -> ModelMuxError {
    if err.is_timeout() {
        ModelMuxError::UpstreamTimeout(err.to_string())
    } else if err.is_connect() {
        ModelMuxError::UpstreamConnection(err.to_string())
    } else {
        ModelMuxError::Upstream(err.to_string())
    }
}

/// Map an HTTP error status onto the upstream error taxonomy.
pub(crate) fn categorize_status(status: reqwest::StatusCode, body: &str) -> ModelMuxError {
    match status.as_u16() {
        401 | 403 => ModelMuxError::UpstreamAuth(format!("{}: {}", status, body)),
        408 | 504 => ModelMuxError::UpstreamTimeout(format!("{}: {}", status, body)),
        _ => ModelMuxError::Upstream(format!("{}: {}", status, body)),
    }
}
