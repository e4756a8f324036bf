//! Tool trait, schema descriptors, and the startup-built registry.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{ModelMuxError, Result};
use crate::llm::models::ToolInvocation;

/// Wire-level tool descriptor advertised to providers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    pub r#type: String,
    pub function: FunctionDescriptor,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Build a function descriptor from a statically declared JSON schema.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDescriptor {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// A callable tool exposed to the model.
///
/// `run` is synchronous; the tool loop executes it on a blocking task so a
/// tool body may do blocking I/O without stalling the scheduler.
pub trait Tool: Send + Sync {
    /// Schema descriptor declared at construction time. No runtime
    /// introspection is involved.
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with the model-supplied arguments.
    fn run(&self, args: &HashMap<String, Value>) -> Result<Value>;
}

/// Named registry of tools, built once at process start and immutable once
/// shared with the orchestration layer.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its descriptor name. Re-registering a name
    /// replaces the earlier tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().function.name.clone();
        self.tools.insert(name, tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors for every registered tool, advertised on provider calls.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    /// Resolve and execute one invocation on a blocking task.
    ///
    /// An unknown name or a failing tool body surfaces as
    /// [`ToolExecution`](ModelMuxError::ToolExecution).
    pub async fn invoke(&self, invocation: &ToolInvocation) -> Result<Value> {
        let tool = self.get(&invocation.name).ok_or_else(|| {
            ModelMuxError::ToolExecution(format!("unknown tool: {}", invocation.name))
        })?;

        info!(tool = %invocation.name, invocation_id = %invocation.id, "Executing tool");

        let args = invocation.arguments.clone();
        tokio::task::spawn_blocking(move || tool.run(&args))
            .await
            .map_err(|e| ModelMuxError::ToolExecution(format!("tool task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    impl Tool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::function(
                "echo",
                "Echo the argument back",
                json!({
                    "type": "object",
                    "properties": {
                        "x": {"type": "string"}
                    },
                    "required": ["x"]
                }),
            )
        }

        fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
            let x = args
                .get("x")
                .cloned()
                .ok_or_else(|| ModelMuxError::ToolExecution("missing argument x".to_string()))?;
            Ok(json!({ "echoed": x }))
        }
    }

    #[test]
    fn test_descriptor_shape() {
        let descriptor = EchoTool.descriptor();
        assert_eq!(descriptor.r#type, "function");
        assert_eq!(descriptor.function.name, "echo");

        let serialized = serde_json::to_string(&descriptor).unwrap();
        assert!(serialized.contains("\"type\":\"function\""));
        assert!(serialized.contains("\"name\":\"echo\""));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.descriptors().len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_runs_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let mut args = HashMap::new();
        args.insert("x".to_string(), json!("hi"));
        let invocation = ToolInvocation::new(Some("call_1".to_string()), "echo", args);

        let result = registry.invoke(&invocation).await.unwrap();
        assert_eq!(result, json!({"echoed": "hi"}));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let invocation = ToolInvocation::new(None, "nope", HashMap::new());

        let err = registry.invoke(&invocation).await.unwrap_err();
        assert!(matches!(err, ModelMuxError::ToolExecution(_)));
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_invoke_propagates_tool_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let invocation = ToolInvocation::new(None, "echo", HashMap::new());
        let err = registry.invoke(&invocation).await.unwrap_err();
        assert!(matches!(err, ModelMuxError::ToolExecution(_)));
    }
}
