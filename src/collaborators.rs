use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A single structured request to an `Agent`, out of scope to implement
/// in-core (§1) — this is only the seam the core calls through.
pub trait Prompt: Send + Sync {
    fn id(&self) -> String;
    fn build_user_message(&self) -> String;
    fn get_data(&self) -> Value;
    fn get_response_format(&self) -> Option<Value> {
        None
    }
    fn validate_response(&self, _response: &Value) -> Result<()> {
        Ok(())
    }
}

/// A conversational/completion backend. Concrete implementations (LLM
/// clients, mocks, recorded fixtures) live outside this crate.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> String;
    fn name(&self) -> String;

    async fn prompt(&self, prompt: &dyn Prompt) -> Result<Value>;

    /// As `prompt`, but also returns backend-specific metadata (token
    /// usage, model id, ...). Default falls back to `prompt` with no
    /// metadata.
    async fn prompt_with_metadata(&self, prompt: &dyn Prompt) -> Result<(Value, Option<Value>)> {
        Ok((self.prompt(prompt).await?, None))
    }

    /// A reflection-specific prompt round trip, used by `ReflectionManager`
    /// at the `Agent` level. Default is unimplemented since not every
    /// agent backend supports it.
    async fn reflect(&self, _prompt: &dyn Prompt) -> Result<Value> {
        Err(Error::Other("agent does not implement reflect".into()))
    }
}

/// A key/value cache collaborator, out of scope to implement in-core (§1).
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);
    async fn bust_prefix(&self, prefix: &str);
    async fn clear(&self);
    fn metrics(&self) -> Value;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Value,
    pub is_error: Option<bool>,
}

/// A tool-execution collaborator (Model Context Protocol-shaped), out of
/// scope to implement in-core (§1).
#[async_trait]
pub trait Mcp: Send + Sync {
    fn register_server(&self, name: &str, config: Value) -> Result<()>;
    fn register_tool_executor(&self, tool_name: &str, executor: Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>);
    fn get_tools(&self) -> Vec<Value>;
    async fn execute_tool(&self, name: &str, input: Value) -> Result<ToolResult>;
}
