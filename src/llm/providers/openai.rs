//! OpenAI-compatible chat completions client.
//!
//! Speaks the `/v1/chat/completions` and `/v1/embeddings` wire format over
//! reqwest. Streaming uses the SSE framing the chat completions endpoint
//! emits (`data: {...}` lines terminated by `data: [DONE]`).

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{ModelMuxError, Result};
use crate::llm::models::{ChatMessage, ToolInvocation};
use crate::llm::provider::{
    categorize_status, categorize_transport_error, ChatReply, Completion, DeltaStream,
    ProviderClient, SamplingParams, StreamDelta,
};
use crate::llm::tools::ToolDescriptor;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDescriptor]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunctionCall,
}

#[derive(Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamMessage,
}

#[derive(Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingsResponseBody {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, OPENAI_API_BASE)
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn chat_body<'a>(
        &self,
        model: &'a str,
        messages: &'a [ChatMessage],
        tools: Option<&'a [ToolDescriptor]>,
        params: &SamplingParams,
        stream: bool,
    ) -> ChatRequestBody<'a> {
        ChatRequestBody {
            model,
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            max_tokens: params.max_tokens,
            tools,
            stream,
        }
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
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

    fn parse_tool_calls(calls: Vec<WireToolCall>) -> Result<Vec<ToolInvocation>> {
        calls
            .into_iter()
            .map(|call| {
                let arguments: HashMap<String, Value> =
                    serde_json::from_str(&call.function.arguments)?;
                Ok(ToolInvocation::new(
                    Some(call.id),
                    call.function.name,
                    arguments,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
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
        debug!(model, message_count = messages.len(), "OpenAI chat request");
        let body = self.chat_body(model, messages, tools, params, false);
        let response = self.post_json("/chat/completions", &body).await?;
        let parsed: ChatResponseBody = response
            .json()
            .await
            .map_err(|e| ModelMuxError::Upstream(format!("malformed chat response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelMuxError::Upstream("response contained no choices".to_string()))?;

        Ok(ChatReply {
            reply: choice.message.content.unwrap_or_default(),
            tool_calls: Self::parse_tool_calls(choice.message.tool_calls)?,
        })
    }

    fn stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
        params: &'a SamplingParams,
    ) -> DeltaStream<'a> {
        Box::pin(async_stream::stream! {
            let body = self.chat_body(model, messages, None, params, true);
            let response = match self.post_json("/chat/completions", &body).await {
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

                // SSE events are newline-delimited; a chunk may carry a
                // partial line, so only complete lines are consumed.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(event) => {
                            if let Some(content) = event
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                            {
                                if !content.is_empty() {
                                    yield Ok(StreamDelta { delta: content });
                                }
                            }
                        }
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

    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        debug!(model, batch = texts.len(), "OpenAI embeddings request");
        let body = serde_json::json!({ "model": model, "input": texts });
        let response = self.post_json("/embeddings", &body).await?;
        let parsed: EmbeddingsResponseBody = response
            .json()
            .await
            .map_err(|e| ModelMuxError::Upstream(format!("malformed embeddings response: {e}")))?;
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> OpenAiClient {
        OpenAiClient::with_base_url("test-key", server.url())
    }

    #[tokio::test]
    async fn test_chat_returns_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"Hello there"}}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let messages = vec![ChatMessage::user("Hi")];
        let reply = client
            .chat("gpt-4o", &messages, None, &SamplingParams::default())
            .await
            .unwrap();

        assert_eq!(reply.reply, "Hello there");
        assert!(reply.tool_calls.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":null,
                    "tool_calls":[{"id":"call_1","type":"function",
                    "function":{"name":"lookup","arguments":"{\"key\":\"value\"}"}}]}}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let messages = vec![ChatMessage::user("use the tool")];
        let reply = client
            .chat("gpt-4o", &messages, None, &SamplingParams::default())
            .await
            .unwrap();

        assert_eq!(reply.reply, "");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].id, "call_1");
        assert_eq!(reply.tool_calls[0].name, "lookup");
        assert_eq!(
            reply.tool_calls[0].arguments.get("key"),
            Some(&serde_json::json!("value"))
        );
    }

    #[tokio::test]
    async fn test_chat_maps_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Invalid API key"}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let messages = vec![ChatMessage::user("Hi")];
        let err = client
            .chat("gpt-4o", &messages, None, &SamplingParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ModelMuxError::UpstreamAuth(_)));
    }

    #[tokio::test]
    async fn test_chat_maps_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let client = client_for(&server);
        let messages = vec![ChatMessage::user("Hi")];
        let err = client
            .chat("gpt-4o", &messages, None, &SamplingParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ModelMuxError::Upstream(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stream_parses_sse_deltas() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{}}]}\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await;

        let client = client_for(&server);
        let messages = vec![ChatMessage::user("Hi")];
        let params = SamplingParams::default();
        let mut stream = client.stream("gpt-4o", &messages, &params);

        let mut collected = String::new();
        while let Some(delta) = stream.next().await {
            collected.push_str(&delta.unwrap().delta);
        }
        assert_eq!(collected, "Hello");
    }

    #[tokio::test]
    async fn test_embed_returns_vectors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":[{"embedding":[0.1,0.2]},{"embedding":[0.3,0.4]}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let vectors = client
            .embed(
                &["first".to_string(), "second".to_string()],
                "text-embedding-3-small",
            )
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }
}
