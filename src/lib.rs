//! modelmux is an orchestration layer for large language model access: one
//! typed request surface in front of multiple provider backends, with
//! sliding-window rate limiting, fingerprint-keyed response caching,
//! bounded retries, and retrieval-augmented answering.
//!
//! The entry points are [`llm::GenerationOrchestrator`] for the generation
//! path, [`llm::RagAgent`] for knowledge-grounded answering, and
//! [`llm::EmbeddingGenerator`] for vectorization.

pub mod cache;
pub mod error;
pub mod limiter;
pub mod llm;

pub use error::{ModelMuxError, Result};

/// Single-import convenience for downstream users.
pub mod prelude {
    pub use crate::cache::{CacheStats, ResponseCache};
    pub use crate::error::{ModelMuxError, Result};
    pub use crate::limiter::RateLimiter;
    pub use crate::llm::{
        AnthropicClient, ChatMessage, EmbeddingGenerator, GenerationOrchestrator,
        GenerationRequest, GenerationResult, ModelId, OpenAiClient, ProviderClient, ProviderKind,
        RagAgent, SamplingParams, Tokenizer, ToolRegistry,
    };
}
