//! Tool that escalates a conversation from the bot to a human agent.
//!
//! Posts a status toggle to the helpdesk API so the conversation reopens in
//! the human agents' queue. The model calls this when the RAG prompt tells
//! it to defer to a human.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ModelMuxError, Result};
use crate::llm::tools::{Tool, ToolDescriptor};

const TIMEOUT_SECONDS: u64 = 10;

/// Escalation tool backed by a Chatwoot-style helpdesk API.
#[derive(Clone)]
pub struct HandoffTool {
    base_url: String,
    access_token: String,
    client: reqwest::blocking::Client,
}

impl HandoffTool {
    /// Create the tool against a helpdesk endpoint.
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .build()
            .map_err(|e| ModelMuxError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            client,
        })
    }

    fn require_str<'a>(args: &'a HashMap<String, Value>, key: &str) -> Result<&'a str> {
        args.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
            ModelMuxError::ToolExecution(format!("{} parameter is required", key))
        })
    }
}

impl Tool for HandoffTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(
            "offload_conversation_to_agent",
            "Offloads a conversation from the bot to a human agent when the \
             conversation needs human involvement.",
            json!({
                "type": "object",
                "properties": {
                    "account_id": {
                        "type": "string",
                        "description": "Account id of the user"
                    },
                    "conversation_id": {
                        "type": "string",
                        "description": "Conversation id of the conversation"
                    }
                },
                "required": ["account_id", "conversation_id"]
            }),
        )
    }

    fn run(&self, args: &HashMap<String, Value>) -> Result<Value> {
        let account_id = Self::require_str(args, "account_id")?;
        let conversation_id = Self::require_str(args, "conversation_id")?;

        let url = format!(
            "{}/accounts/{}/conversations/{}/toggle_status",
            self.base_url, account_id, conversation_id
        );

        let response = self
            .client
            .post(&url)
            .header("api_access_token", &self.access_token)
            .json(&json!({ "status": "open" }))
            .send()
            .map_err(|e| ModelMuxError::ToolExecution(format!("handoff request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ModelMuxError::ToolExecution(format!(
                "handoff request failed with status {}",
                response.status()
            )));
        }

        response
            .json::<Value>()
            .map_err(|e| ModelMuxError::ToolExecution(format!("invalid handoff response: {}", e)))
    }
}
