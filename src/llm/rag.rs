//! Retrieval-augmented answering with a zero-shot fallback.
//!
//! The agent retrieves knowledge chunks for the incoming query, keeps only
//! those above the relevance threshold, and commits to exactly one prompt
//! path: grounded answering over the surviving context, or zero-shot
//! answering when nothing survives. Tool calls returned by the model are
//! executed for at most one round before the final answer is produced.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ModelMuxError, Result};
use crate::llm::models::{ChatMessage, ModelId};
use crate::llm::prompts::{
    format_history, render_template, sanitize_output, RAG_TEMPLATE, ZERO_SHOT_TEMPLATE,
};
use crate::llm::provider::{ProviderClient, SamplingParams};
use crate::llm::retrieval::KnowledgeRetriever;
use crate::llm::tools::ToolRegistry;

/// Chunks fetched per query before relevance filtering.
pub const RAG_TOP_K: usize = 5;

/// Chunks must score strictly above this to count as relevant.
pub const MIN_RELEVANCE_SCORE: f32 = 0.5;

/// Which prompt template a query was answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPath {
    Rag,
    ZeroShot,
}

/// Retrieves and filters context, deciding the prompt path for a query.
pub struct RetrievalAugmenter {
    retriever: Arc<dyn KnowledgeRetriever>,
    top_k: usize,
    min_score: f32,
}

impl RetrievalAugmenter {
    pub fn new(retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        Self {
            retriever,
            top_k: RAG_TOP_K,
            min_score: MIN_RELEVANCE_SCORE,
        }
    }

    /// Fetch context for the query. Retrieval failures propagate; they are
    /// never masked by falling through to the zero-shot path.
    pub async fn assemble(&self, query: &str) -> Result<(PromptPath, String)> {
        let chunks = self.retriever.retrieve(query, self.top_k).await?;
        let relevant: Vec<&str> = chunks
            .iter()
            .filter(|c| c.score > self.min_score)
            .map(|c| c.text.as_str())
            .collect();

        if relevant.is_empty() {
            debug!(fetched = chunks.len(), "No relevant context, using zero-shot path");
            return Ok((PromptPath::ZeroShot, String::new()));
        }
        debug!(fetched = chunks.len(), kept = relevant.len(), "Using retrieval-augmented path");
        Ok((PromptPath::Rag, relevant.join("\n\n")))
    }
}

/// Conversational agent over a knowledge base, with optional tools.
pub struct RagAgent {
    augmenter: RetrievalAugmenter,
    provider: Arc<dyn ProviderClient>,
    model: ModelId,
    tools: Arc<ToolRegistry>,
    params: SamplingParams,
}

impl RagAgent {
    pub fn new(
        retriever: Arc<dyn KnowledgeRetriever>,
        provider: Arc<dyn ProviderClient>,
        model: ModelId,
    ) -> Self {
        Self {
            augmenter: RetrievalAugmenter::new(retriever),
            provider,
            model,
            tools: Arc::new(ToolRegistry::new()),
            // Deterministic, tightly bounded answers for support traffic.
            params: SamplingParams {
                temperature: 0.0,
                top_p: 0.9,
                max_tokens: Some(400),
                ..SamplingParams::default()
            },
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    /// Answer a query against the knowledge base.
    ///
    /// Runs at most one tool round: tool calls from the first model turn are
    /// each executed once, their results fed back in a single tool message,
    /// and the second turn's text is final. Tool calls in the second turn
    /// are logged and dropped.
    pub async fn respond(&self, query: &str, history: &[ChatMessage]) -> Result<String> {
        if query.trim().is_empty() {
            return Err(ModelMuxError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }

        let (path, context) = self.augmenter.assemble(query).await?;
        let template = match path {
            PromptPath::Rag => RAG_TEMPLATE,
            PromptPath::ZeroShot => ZERO_SHOT_TEMPLATE,
        };
        let prompt = render_template(template, &context, &format_history(history), query);

        let descriptors = self.tools.descriptors();
        let tools = (!descriptors.is_empty()).then_some(descriptors.as_slice());

        let mut messages = vec![ChatMessage::user(prompt)];
        let first = self
            .provider
            .chat(self.model.as_str(), &messages, tools, &self.params)
            .await?;

        if first.tool_calls.is_empty() {
            return Ok(sanitize_output(&first.reply));
        }

        info!(count = first.tool_calls.len(), "Executing requested tools");
        let mut executed = HashSet::new();
        let mut results = serde_json::Map::new();
        for invocation in &first.tool_calls {
            // Duplicate invocation ids are executed once.
            if !executed.insert(invocation.id.clone()) {
                continue;
            }
            let output = self.tools.invoke(invocation).await?;
            results.insert(invocation.id.clone(), output);
        }

        if !first.reply.is_empty() {
            messages.push(ChatMessage::assistant(&first.reply));
        }
        messages.push(ChatMessage::tool(
            serde_json::to_string(&Value::Object(results))?,
        ));

        let second = self
            .provider
            .chat(self.model.as_str(), &messages, tools, &self.params)
            .await?;
        if !second.tool_calls.is_empty() {
            warn!(
                count = second.tool_calls.len(),
                "Model requested tools after the tool round, ignoring"
            );
        }

        Ok(sanitize_output(&second.reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{ChatReply, Completion, DeltaStream, StreamDelta};
    use crate::llm::retrieval::RetrievedChunk;
    use crate::llm::tools::{Tool, ToolDescriptor};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubRetriever {
        chunks: Vec<RetrievedChunk>,
        fail: bool,
    }

    impl StubRetriever {
        fn with_chunks(chunks: Vec<(&str, f32)>) -> Arc<Self> {
            Arc::new(Self {
                chunks: chunks
                    .into_iter()
                    .map(|(text, score)| RetrievedChunk {
                        text: text.to_string(),
                        score,
                    })
                    .collect(),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                chunks: vec![],
                fail: true,
            })
        }
    }

    #[async_trait]
    impl KnowledgeRetriever for StubRetriever {
        async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievedChunk>> {
            if self.fail {
                return Err(ModelMuxError::Retrieval("index unavailable".to_string()));
            }
            Ok(self.chunks.clone())
        }
    }

    /// Provider double that records every prompt and pops scripted replies.
    struct ScriptedProvider {
        replies: Mutex<Vec<ChatReply>>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<ChatReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn text_reply(text: &str) -> ChatReply {
            ChatReply {
                reply: text.to_string(),
                tool_calls: vec![],
            }
        }

        fn prompt_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn first_prompt_text(&self) -> String {
            self.prompts.lock().unwrap()[0][0].content.clone()
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        async fn complete(
            &self,
            _model: &str,
            _prompt: &str,
            _max_tokens: usize,
            _params: &SamplingParams,
        ) -> Result<Completion> {
            Err(ModelMuxError::Upstream("unused".to_string()))
        }

        async fn chat(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _tools: Option<&[ToolDescriptor]>,
            _params: &SamplingParams,
        ) -> Result<ChatReply> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ModelMuxError::Upstream("no scripted reply".to_string()));
            }
            Ok(replies.remove(0))
        }

        fn stream<'a>(
            &'a self,
            _model: &'a str,
            _messages: &'a [ChatMessage],
            _params: &'a SamplingParams,
        ) -> DeltaStream<'a> {
            Box::pin(futures::stream::empty::<Result<StreamDelta>>())
        }

        async fn embed(&self, _texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>> {
            Ok(vec![])
        }
    }

    struct EchoTool;

    impl Tool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::function(
                "echo",
                "Echo the arguments back",
                serde_json::json!({"type": "object", "properties": {}}),
            )
        }

        fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
            Ok(serde_json::to_value(args)?)
        }
    }

    #[tokio::test]
    async fn test_relevant_context_selects_rag_path() {
        let retriever = StubRetriever::with_chunks(vec![("refund policy text", 0.9), ("noise", 0.3)]);
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_reply("From the docs.")]);
        let agent = RagAgent::new(retriever, provider.clone(), ModelId::Claude35Sonnet);

        let answer = agent.respond("What is the refund policy?", &[]).await.unwrap();

        assert_eq!(answer, "From the docs.");
        let prompt = provider.first_prompt_text();
        assert!(prompt.contains("refund policy text"));
        assert!(!prompt.contains("noise"));
        assert!(prompt.contains("using only"));
    }

    #[tokio::test]
    async fn test_no_relevant_context_selects_zero_shot_path() {
        let retriever = StubRetriever::with_chunks(vec![("weak", 0.5), ("weaker", 0.2)]);
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_reply("General answer.")]);
        let agent = RagAgent::new(retriever, provider.clone(), ModelId::Claude35Sonnet);

        let answer = agent.respond("Unrelated question", &[]).await.unwrap();

        assert_eq!(answer, "General answer.");
        let prompt = provider.first_prompt_text();
        assert!(prompt.contains("based on your knowledge"));
        assert!(!prompt.contains("weak"));
    }

    #[tokio::test]
    async fn test_retrieval_failure_propagates() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_reply("unreached")]);
        let agent = RagAgent::new(StubRetriever::failing(), provider.clone(), ModelId::Gpt4o);

        let err = agent.respond("anything", &[]).await.unwrap_err();

        assert!(matches!(err, ModelMuxError::Retrieval(_)));
        assert_eq!(provider.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let provider = ScriptedProvider::new(vec![]);
        let agent = RagAgent::new(
            StubRetriever::with_chunks(vec![]),
            provider.clone(),
            ModelId::Gpt4o,
        );

        let err = agent.respond("   ", &[]).await.unwrap_err();
        assert!(matches!(err, ModelMuxError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_one_round_tool_loop() {
        use crate::llm::models::ToolInvocation;

        let mut args = HashMap::new();
        args.insert("key".to_string(), serde_json::json!("value"));
        let call = ToolInvocation::new(Some("call_1".to_string()), "echo", args);

        let provider = ScriptedProvider::new(vec![
            ChatReply {
                reply: String::new(),
                tool_calls: vec![call.clone(), call],
            },
            ScriptedProvider::text_reply("Done with the tool[1]."),
        ]);

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let retriever = StubRetriever::with_chunks(vec![("context", 0.8)]);
        let agent = RagAgent::new(retriever, provider.clone(), ModelId::Claude35Sonnet)
            .with_tools(Arc::new(registry));

        let answer = agent.respond("do the thing", &[]).await.unwrap();

        // Final answer is sanitized; exactly two model turns happened.
        assert_eq!(answer, "Done with the tool.");
        assert_eq!(provider.prompt_count(), 2);

        // Duplicate invocation ids collapse to a single result entry.
        let prompts = provider.prompts.lock().unwrap();
        let tool_message = prompts[1].last().unwrap();
        let parsed: Value = serde_json::from_str(&tool_message.content).unwrap();
        assert_eq!(parsed.as_object().unwrap().len(), 1);
        assert_eq!(parsed["call_1"]["key"], serde_json::json!("value"));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails() {
        use crate::llm::models::ToolInvocation;

        let call = ToolInvocation::new(Some("call_1".to_string()), "missing", HashMap::new());
        let provider = ScriptedProvider::new(vec![ChatReply {
            reply: String::new(),
            tool_calls: vec![call],
        }]);

        let retriever = StubRetriever::with_chunks(vec![("context", 0.8)]);
        let agent = RagAgent::new(retriever, provider, ModelId::Claude35Sonnet)
            .with_tools(Arc::new(ToolRegistry::new()));

        let err = agent.respond("do the thing", &[]).await.unwrap_err();
        assert!(matches!(err, ModelMuxError::ToolExecution(_)));
    }

    #[tokio::test]
    async fn test_history_rendered_into_prompt() {
        let retriever = StubRetriever::with_chunks(vec![("context", 0.8)]);
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_reply("ok")]);
        let agent = RagAgent::new(retriever, provider.clone(), ModelId::Gpt4o);

        let history = vec![
            ChatMessage::user("earlier question"),
            ChatMessage::assistant("earlier answer"),
        ];
        agent.respond("follow-up", &history).await.unwrap();

        let prompt = provider.first_prompt_text();
        assert!(prompt.contains("Human: earlier question"));
        assert!(prompt.contains("AI: earlier answer"));
    }
}
