//! Anthropic Messages API client.
//!
//! The Messages API differs from the chat completions shape in three ways
//! this client has to absorb: the system prompt travels as a top-level
//! field rather than a message, `max_tokens` is mandatory, and tool calls
//! arrive as `tool_use` content blocks. Anthropic exposes no embeddings
//! endpoint, so `embed` reports the model as unsupported.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{ModelMuxError, Result};
use crate::llm::models::{ChatMessage, MessageRole, ToolInvocation};
use crate::llm::provider::{
    categorize_status, categorize_transport_error, ChatReply, Completion, DeltaStream,
    ProviderClient, SamplingParams, StreamDelta,
};
use crate::llm::tools::ToolDescriptor;

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 1024;

pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct MessagesRequestBody<'a> {
    model: &'a str,
    max_tokens: usize,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Anthropic's tool schema keys the parameters as `input_schema`.
#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Deserialize)]
struct MessagesResponseBody {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: HashMap<String, Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: BlockDelta },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, ANTHROPIC_API_BASE)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Split the message list into the Messages API shape: system content
    /// is lifted out, the rest keeps its ordering.
    fn messages_body<'a>(
        &self,
        model: &'a str,
        messages: &'a [ChatMessage],
        tools: Option<&'a [ToolDescriptor]>,
        params: &SamplingParams,
        stream: bool,
    ) -> MessagesRequestBody<'a> {
        let system = messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str());
        let turns = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| WireMessage {
                role: match m.role {
                    MessageRole::Assistant => "assistant",
                    _ => "user",
                },
                content: &m.content,
            })
            .collect();

        MessagesRequestBody {
            model,
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: turns,
            system,
            temperature: params.temperature,
            top_p: params.top_p,
            tools: tools.map(|ts| {
                ts.iter()
                    .map(|t| WireTool {
                        name: &t.function.name,
                        description: &t.function.description,
                        input_schema: &t.function.parameters,
                    })
                    .collect()
            }),
            stream,
        }
    }

    async fn post_messages<B: Serialize>(&self, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(categorize_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(categorize_status(status, &detail));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: usize,
        params: &SamplingParams,
    ) -> Result<Completion> {
        let messages = vec![ChatMessage::user(prompt)];
        let mut params = params.clone();
        params.max_tokens = Some(max_tokens);
        let reply = self.chat(model, &messages, None, &params).await?;
        Ok(Completion {
            tokens_used: reply.reply.split_whitespace().count(),
            text: reply.reply,
        })
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDescriptor]>,
        params: &SamplingParams,
    ) -> Result<ChatReply> {
        debug!(model, message_count = messages.len(), "Anthropic messages request");
        let body = self.messages_body(model, messages, tools, params, false);
        let response = self.post_messages(&body).await?;
        let parsed: MessagesResponseBody = response
            .json()
            .await
            .map_err(|e| ModelMuxError::Upstream(format!("malformed messages response: {e}")))?;

        let mut reply = ChatReply::default();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => reply.reply.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => {
                    reply
                        .tool_calls
                        .push(ToolInvocation::new(Some(id), name, input));
                }
                ContentBlock::Other => {}
            }
        }
        Ok(reply)
    }

    fn stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
        params: &'a SamplingParams,
    ) -> DeltaStream<'a> {
        Box::pin(async_stream::stream! {
            let body = self.messages_body(model, messages, None, params, true);
            let response = match self.post_messages(&body).await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(categorize_transport_error(e));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    match serde_json::from_str::<StreamEvent>(payload) {
                        Ok(StreamEvent::ContentBlockDelta { delta }) => {
                            if let Some(text) = delta.text {
                                if !text.is_empty() {
                                    yield Ok(StreamDelta { delta: text });
                                }
                            }
                        }
                        Ok(StreamEvent::MessageStop) => return,
                        Ok(StreamEvent::Other) => {}
                        Err(e) => {
                            yield Err(ModelMuxError::Upstream(format!(
                                "malformed stream event: {e}"
                            )));
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn embed(&self, _texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        Err(ModelMuxError::UnsupportedModel(format!(
            "{model}: Anthropic exposes no embeddings endpoint"
        )))
    }
}
