//! Batched embedding generation with cost accounting.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::error::{ModelMuxError, Result};
use crate::limiter::RateLimiter;
use crate::llm::provider::ProviderClient;
use crate::llm::tokenizer::Tokenizer;

/// Inputs are sent upstream in batches of this size.
pub const EMBEDDING_BATCH_SIZE: usize = 100;

/// Expected vector width for a known embedding model.
pub fn embedding_dimensions(model: &str) -> Result<usize> {
    match model {
        "text-embedding-3-large" => Ok(1536),
        "text-embedding-3-small" => Ok(768),
        other => Err(ModelMuxError::UnsupportedModel(other.to_string())),
    }
}

/// Price per token in USD for a known embedding model.
fn cost_per_token(model: &str) -> f64 {
    match model {
        "text-embedding-3-large" => 0.0001,
        _ => 0.00005,
    }
}

/// Turns texts into vectors through a provider, batching inputs, enforcing
/// the model's dimensionality, and accumulating the dollar cost of tokens
/// sent.
pub struct EmbeddingGenerator {
    provider: Arc<dyn ProviderClient>,
    limiter: Arc<RateLimiter>,
    tokenizer: Tokenizer,
    total_cost: Mutex<f64>,
}

impl EmbeddingGenerator {
    pub fn new(provider: Arc<dyn ProviderClient>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            provider,
            limiter,
            tokenizer: Tokenizer::default(),
            total_cost: Mutex::new(0.0),
        }
    }

    /// Embed every text, preserving input order across batches.
    pub async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        let expected = embedding_dimensions(model)?;
        if texts.is_empty() {
            return Err(ModelMuxError::InvalidRequest(
                "no texts to embed".to_string(),
            ));
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(ModelMuxError::InvalidRequest(
                "texts to embed must not be empty".to_string(),
            ));
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            self.limiter.wait().await;
            debug!(model, batch = batch.len(), "Embedding batch");
            let embedded = self.provider.embed(batch, model).await?;

            for vector in &embedded {
                if vector.len() != expected {
                    return Err(ModelMuxError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
            }
            vectors.extend(embedded);
        }

        let tokens = self
            .tokenizer
            .count_all(texts.iter().map(|t| t.as_str()));
        let cost = tokens as f64 * cost_per_token(model);
        let mut total = self
            .total_cost
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *total += cost;
        info!(model, tokens, cost, total = *total, "Embedding cost recorded");

        Ok(vectors)
    }

    /// Cumulative dollar cost across all calls on this generator.
    pub fn total_cost(&self) -> f64 {
        *self.total_cost.lock().unwrap_or_else(|e| e.into_inner())
    }
}
