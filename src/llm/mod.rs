//! Agent Runner's upstream LLM client (C4, step 1-2 of spec §4.4).
//!
//! Grounded on the teacher's `llm::LlmProvider` trait shape
//! (`complete`/`complete_with_tools`/`model_name`) and
//! `llm::nearai_chat::NearAiChatProvider`'s reqwest-JSON-POST,
//! manual-struct-mapping style, generalized onto one provider speaking an
//! OpenAI-Chat-Completions-shaped wire protocol (SPEC_FULL §4.4 — the de
//! facto lowest common denominator for self-hosted/gateway endpoints).

pub mod http_provider;

pub use http_provider::HttpLlmProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::Tool;

/// One turn in a chat-shaped conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }
}

/// A request for the model to invoke a named tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of one upstream completion call.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// The model produced a final assistant message.
    Message(String),
    /// The model wants to invoke one or more tools before continuing.
    ToolCalls(Vec<ToolCall>),
}

/// Token usage reported by the upstream provider, when available.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub outcome: CompletionOutcome,
    pub usage: Usage,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("upstream response could not be parsed: {0}")]
    InvalidResponse(String),
}

/// The capability surface the Agent Runner needs from an upstream LLM
/// endpoint. One implementation (`HttpLlmProvider`) backs every `Provider`
/// row — the wire protocol is fixed, only `base_url`/`api_key`/`model_id`
/// vary per call (spec §1 Non-goal: "concrete LLM wire protocols").
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResponse, LlmError>;

    async fn complete_with_tools(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<CompletionResponse, LlmError>;
}
