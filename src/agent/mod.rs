//! Agent Runner (C4): one bounded synchronous LLM interaction, including
//! the tool-use loop. Grounded on `llm::reasoning::Reasoning`'s
//! action-plan/tool-selection loop shape, bounded the way
//! `agent::heartbeat` and `sandbox::manager`'s retries are bounded.

use std::sync::Arc;

use uuid::Uuid;

use crate::llm::{ChatMessage, CompletionOutcome, HttpLlmProvider, LlmProvider, Usage};
use crate::model::Agent;
use crate::store::PrimitiveStore;
use crate::tools::{ToolError, ToolRegistry};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("agent execution failed: {0}")]
    ExecutionFailed(String),
}

impl From<crate::store::StoreError> for AgentError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound(msg) => AgentError::NotFound(msg),
            other => AgentError::ExecutionFailed(other.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct AgentOutput {
    pub text: String,
    pub usage: Usage,
}

/// Runs one agent invocation to completion, bounded by
/// `max_tool_iterations` (default 8, spec §4.4 step 3).
pub struct AgentRunner {
    store: Arc<dyn PrimitiveStore>,
    tools: Arc<ToolRegistry>,
    http_client: reqwest::Client,
    max_tool_iterations: u32,
}

impl AgentRunner {
    pub fn new(
        store: Arc<dyn PrimitiveStore>,
        tools: Arc<ToolRegistry>,
        http_client: reqwest::Client,
        max_tool_iterations: u32,
    ) -> Self {
        Self {
            store,
            tools,
            http_client,
            max_tool_iterations,
        }
    }

    pub async fn run(&self, agent: &Agent, mut messages: Vec<ChatMessage>) -> Result<AgentOutput, AgentError> {
        let provider_record = self.store.get_provider(agent.provider_id).await?;
        let provider = HttpLlmProvider::new(self.http_client.clone(), &provider_record);
        let assigned_tools = self.store.list_tools_for_agent(agent.id).await?;

        let mut usage = Usage::default();

        for _ in 0..self.max_tool_iterations {
            let response = provider
                .complete_with_tools(&agent.model_id, &agent.system_prompt, &messages, &assigned_tools)
                .await
                .map_err(|e| AgentError::ExecutionFailed(e.to_string()))?;

            usage.prompt_tokens = response.usage.prompt_tokens.or(usage.prompt_tokens);
            usage.completion_tokens = response.usage.completion_tokens.or(usage.completion_tokens);

            match response.outcome {
                CompletionOutcome::Message(text) => {
                    return Ok(AgentOutput { text, usage });
                }
                CompletionOutcome::ToolCalls(calls) => {
                    for call in calls {
                        let tool_result = self.run_tool(agent.id, &call.name, call.arguments).await;
                        let content = match tool_result {
                            Ok(value) => value.to_string(),
                            Err(err) => serde_json::json!({ "error": err.to_string() }).to_string(),
                        };
                        messages.push(ChatMessage::tool_result(call.id, call.name, content));
                    }
                }
            }
        }

        Err(AgentError::ExecutionFailed(format!(
            "exceeded max_tool_iterations ({})",
            self.max_tool_iterations
        )))
    }

    async fn run_tool(
        &self,
        agent_id: Uuid,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self.tools.resolve_by_name(agent_id, name).await?;
        tool.execute(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Provider;
    use crate::store::memory::MemoryPrimitiveStore;

    fn agent(provider_id: Uuid) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            name: "responder".to_string(),
            provider_id,
            model_id: "test-model".to_string(),
            system_prompt: "Respond helpfully.".to_string(),
            tool_ids: vec![],
        }
    }

    #[tokio::test]
    async fn missing_provider_surfaces_as_not_found() {
        let store = Arc::new(MemoryPrimitiveStore::new());
        let registry = Arc::new(ToolRegistry::new(store.clone(), reqwest::Client::new()));
        let runner = AgentRunner::new(store, registry, reqwest::Client::new(), 8);

        let err = runner
            .run(&agent(Uuid::new_v4()), vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn resolves_provider_before_attempting_upstream_call() {
        let store = Arc::new(MemoryPrimitiveStore::new());
        let provider = Provider {
            id: Uuid::new_v4(),
            name: "local".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: "test".to_string(),
        };
        store.insert_provider(provider.clone());
        let registry = Arc::new(ToolRegistry::new(store.clone(), reqwest::Client::new()));
        let runner = AgentRunner::new(store, registry, reqwest::Client::new(), 8);

        // The upstream call itself will fail (nothing listening on :1), but
        // it must get past provider resolution to do so.
        let err = runner
            .run(&agent(provider.id), vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ExecutionFailed(_)));
    }
}
