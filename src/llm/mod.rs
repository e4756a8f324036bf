//! Model access layer: request/response types, provider clients, and the
//! orchestration built on top of them.

pub mod embeddings;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod provider;
pub mod providers;
pub mod rag;
pub mod retrieval;
pub mod tokenizer;
pub mod tools;

pub use embeddings::EmbeddingGenerator;
pub use models::{
    ChatMessage, GenerationRequest, GenerationResult, MessageRole, ModelId, ProviderKind,
    TokenUsage, ToolInvocation,
};
pub use orchestrator::GenerationOrchestrator;
pub use provider::{ChatReply, Completion, DeltaStream, ProviderClient, SamplingParams, StreamDelta};
pub use providers::{AnthropicClient, OpenAiClient};
pub use rag::{PromptPath, RagAgent, RetrievalAugmenter};
pub use retrieval::{InMemoryVectorStore, KnowledgeRetriever, RetrievedChunk, VectorStore};
pub use tokenizer::Tokenizer;
pub use tools::{HandoffTool, Tool, ToolDescriptor, ToolRegistry};
