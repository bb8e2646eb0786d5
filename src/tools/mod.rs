//! Tool registry for the Agent Runner's tool-use loop (spec §4.4).
//!
//! `Tool` is kept close to the teacher's `tools::tool::Tool` trait since
//! it was already domain-general (name/description/schema/execute); the
//! four implementations below are grounded one-per-`tool_type`
//! (`tools/builtin/http.rs`, `tools/builtin/shell.rs`, `context::memory`).

pub mod database;
pub mod filesystem;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Tool as ToolConfig, ToolType};
use crate::store::{PrimitiveStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("tool timed out")]
    Timeout,

    #[error("tool not found: {0}")]
    NotFound(Uuid),
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        ToolError::ExecutionFailed(err.to_string())
    }
}

/// One capability an agent can invoke mid-completion.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Resolves a `Tool` trait object fresh for every call from the
/// `ToolConfig` row stored against the agent — there is no live
/// reconfiguration API (SPEC_FULL §9 Open Question 2); a config row
/// change takes effect on the next invocation.
pub struct ToolRegistry {
    store: std::sync::Arc<dyn PrimitiveStore>,
    http_client: reqwest::Client,
}

impl ToolRegistry {
    pub fn new(store: std::sync::Arc<dyn PrimitiveStore>, http_client: reqwest::Client) -> Self {
        Self { store, http_client }
    }

    pub async fn resolve(&self, agent_id: Uuid, tool_id: Uuid) -> Result<Box<dyn Tool>, ToolError> {
        let config = self.store.get_tool(tool_id).await?;
        Ok(self.build(agent_id, config))
    }

    pub async fn resolve_by_name(&self, agent_id: Uuid, name: &str) -> Result<Box<dyn Tool>, ToolError> {
        let tools = self.store.list_tools_for_agent(agent_id).await?;
        let config = tools
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ToolError::ExecutionFailed(format!("tool '{name}' not assigned to agent")))?;
        Ok(self.build(agent_id, config))
    }

    fn build(&self, agent_id: Uuid, config: ToolConfig) -> Box<dyn Tool> {
        match config.tool_type {
            ToolType::Http => Box::new(http::HttpTool::new(self.http_client.clone(), config)),
            ToolType::Database => Box::new(database::DatabaseTool::new(config)),
            ToolType::Memory => Box::new(memory::MemoryTool::new(config, agent_id)),
            ToolType::Filesystem => Box::new(filesystem::FilesystemTool::new(config)),
        }
    }
}
