use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use pricebot_core::ToolSpec;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{name}`")]
    UnknownTool { name: String },
    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("`{tool}` failed upstream: {reason}")]
    Upstream { tool: String, reason: String },
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Name-keyed dispatch over the registered tools. Each call is independent
/// and stateless; no retries happen at this layer.
#[derive(Default)]
pub struct ToolServer {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.spec().name, Box::new(tool));
    }

    /// The static catalog, sorted by name for a stable ordering.
    pub fn list_tools(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|tool| tool.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool { name: name.to_string() })?;
        debug!(event_name = "tools.dispatch", tool = name, "dispatching tool call");
        tool.call(arguments).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
