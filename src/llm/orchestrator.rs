//! Generation orchestration: admission, caching, retries, and streaming.
//!
//! The orchestrator composes the rate limiter, response cache, and provider
//! clients into the end-to-end request/response and request/stream
//! contracts. It owns the retry and timeout policy and carries no long-lived
//! mutable state of its own; the limiter and cache are constructed at
//! startup and injected.

use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::error::{ModelMuxError, Result};
use crate::limiter::RateLimiter;
use crate::llm::models::{
    ChatMessage, GenerationRequest, GenerationResult, ModelId, ProviderKind, TokenUsage,
};
use crate::llm::prompts::merge_prompt_messages;
use crate::llm::provider::ProviderClient;
use crate::llm::tokenizer::Tokenizer;

/// Maximum provider invocation attempts per request.
pub const MAX_RETRIES: u32 = 3;

/// Exponential backoff base in seconds: 2s, 4s between the three attempts.
pub const RETRY_BACKOFF_SECS: u64 = 2;

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(RETRY_BACKOFF_SECS.pow(attempt))
}

/// Composes providers, limiter, and cache into the generation request path.
pub struct GenerationOrchestrator {
    providers: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache<GenerationResult>>,
    tokenizer: Tokenizer,
}

impl GenerationOrchestrator {
    /// Create an orchestrator around an injected limiter and cache. Provider
    /// clients are attached with [`with_provider`](Self::with_provider).
    pub fn new(limiter: Arc<RateLimiter>, cache: Arc<ResponseCache<GenerationResult>>) -> Self {
        Self {
            providers: HashMap::new(),
            limiter,
            cache,
            tokenizer: Tokenizer::default(),
        }
    }

    /// Attach a provider client for a backend family.
    pub fn with_provider(mut self, kind: ProviderKind, client: Arc<dyn ProviderClient>) -> Self {
        self.providers.insert(kind, client);
        self
    }

    fn client_for(&self, model: ModelId) -> Result<Arc<dyn ProviderClient>> {
        let kind = model
            .provider()
            .ok_or_else(|| ModelMuxError::UnsupportedModel(model.to_string()))?;
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ModelMuxError::UnsupportedModel(model.to_string()))
    }

    /// Generate a completion for the request.
    ///
    /// Stages: validation, cache lookup, provider invocation under retry and
    /// per-attempt timeout, usage accounting, cache store. Two logically
    /// equivalent requests inside the cache TTL invoke the provider once.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        request.validate()?;
        let client = self.client_for(request.model)?;

        let key = request.fingerprint()?;
        if let Some(hit) = self.cache.get(&key) {
            debug!(model = %request.model, "Response cache hit");
            return Ok(hit);
        }

        let messages = merge_prompt_messages(
            &request.user_prompt,
            request.system_prompt.as_deref(),
            request.messages.as_deref(),
            true,
        );

        let reply = self
            .invoke_with_retry(client.as_ref(), request, &messages)
            .await?;

        let prompt_tokens = self
            .tokenizer
            .count_all(messages.iter().map(|m| m.content.as_str()));
        let completion_tokens = self.tokenizer.count(&reply);

        let result = GenerationResult {
            content: reply,
            model: request.model,
            usage: TokenUsage::new(prompt_tokens, completion_tokens),
        };

        self.cache.put(key, result.clone());
        Ok(result)
    }

    async fn invoke_with_retry(
        &self,
        client: &dyn ProviderClient,
        request: &GenerationRequest,
        messages: &[ChatMessage],
    ) -> Result<String> {
        let mut last_err: Option<ModelMuxError> = None;

        for attempt in 1..=MAX_RETRIES {
            // Admission is re-checked before every attempt; the limiter is
            // never bypassed on retry.
            self.limiter.wait().await;

            let call = client.chat(request.model.as_str(), messages, None, &request.params);
            let err = match tokio::time::timeout(request.timeout, call).await {
                Ok(Ok(reply)) => {
                    if attempt > 1 {
                        info!(attempt, model = %request.model, "Generation succeeded after retry");
                    }
                    return Ok(reply.reply);
                }
                Ok(Err(e)) if !e.is_retryable() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => ModelMuxError::UpstreamTimeout(format!(
                    "provider call exceeded {:.1}s",
                    request.timeout.as_secs_f64()
                )),
            };

            warn!(attempt, model = %request.model, error = %err, "Provider call failed");
            if attempt < MAX_RETRIES {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            last_err = Some(err);
        }

        Err(ModelMuxError::RetriesExhausted {
            attempts: MAX_RETRIES,
            source: Box::new(
                last_err.unwrap_or_else(|| ModelMuxError::Upstream("no attempt executed".to_string())),
            ),
        })
    }

    /// Generate a lazily streamed completion.
    ///
    /// An empty user prompt fails fast with no retry. Each retry attempt
    /// re-establishes the stream from scratch; once the first delta has been
    /// yielded, any failure is terminal for the call. Streaming responses
    /// are never cached. Dropping the returned stream drops the underlying
    /// provider connection.
    pub fn generate_stream<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>> {
        Box::pin(async_stream::stream! {
            if let Err(e) = request.validate() {
                yield Err(e);
                return;
            }
            let client = match self.client_for(request.model) {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let messages = merge_prompt_messages(
                &request.user_prompt,
                request.system_prompt.as_deref(),
                request.messages.as_deref(),
                true,
            );

            let mut attempt = 1u32;
            'attempts: loop {
                self.limiter.wait().await;

                let mut upstream =
                    client.stream(request.model.as_str(), &messages, &request.params);
                let mut yielded = false;

                loop {
                    let err = match tokio::time::timeout(request.timeout, upstream.next()).await {
                        Ok(Some(Ok(chunk))) => {
                            yielded = true;
                            yield Ok(chunk.delta);
                            continue;
                        }
                        Ok(None) => return,
                        Ok(Some(Err(e))) => e,
                        Err(_) => ModelMuxError::UpstreamTimeout(format!(
                            "stream stalled beyond {:.1}s",
                            request.timeout.as_secs_f64()
                        )),
                    };

                    if yielded {
                        // No silent retry once streaming has begun.
                        warn!(model = %request.model, error = %err, "Stream failed mid-flight");
                        yield Err(err);
                        return;
                    }
                    if !err.is_retryable() {
                        yield Err(err);
                        return;
                    }

                    warn!(attempt, model = %request.model, error = %err, "Stream establishment failed");
                    if attempt >= MAX_RETRIES {
                        yield Err(ModelMuxError::RetriesExhausted {
                            attempts: MAX_RETRIES,
                            source: Box::new(err),
                        });
                        return;
                    }
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    attempt += 1;
                    continue 'attempts;
                }
            }
        })
    }
}
