//! Model selector parsing and the chat-completions wire shape, grounded
//! on `orchestrator::api`'s validate-then-route handler style.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// The three request shapes spec §4.6 routes between. `async/workflow/`
/// is checked first since it's a strict extension of `workflow/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelector {
    Agent(String),
    Workflow(String),
    AsyncWorkflow(String),
}

impl ModelSelector {
    pub fn parse(model: &str) -> Result<Self, ApiError> {
        if model.is_empty() {
            return Err(ApiError::validation("model must not be empty"));
        }
        if let Some(name) = model.strip_prefix("async/workflow/") {
            if name.is_empty() {
                return Err(ApiError::validation("workflow name must not be empty"));
            }
            return Ok(ModelSelector::AsyncWorkflow(name.to_string()));
        }
        if let Some(name) = model.strip_prefix("workflow/") {
            if name.is_empty() {
                return Err(ApiError::validation("workflow name must not be empty"));
            }
            return Ok(ModelSelector::Workflow(name.to_string()));
        }
        if let Some(name) = model.strip_prefix("agent/") {
            if name.is_empty() {
                return Err(ApiError::validation("agent name must not be empty"));
            }
            return Ok(ModelSelector::Agent(name.to_string()));
        }
        Err(ApiError::validation(
            "model must start with 'agent/', 'workflow/', or 'async/workflow/'",
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageWire {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessageWire>,
    #[serde(default)]
    pub stream: Option<bool>,
}

impl ChatCompletionRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.messages.is_empty() {
            return Err(ApiError::validation("messages must not be empty"));
        }
        for message in &self.messages {
            if message.role.is_empty() {
                return Err(ApiError::validation("message role must not be empty"));
            }
            if message.content.is_empty() {
                return Err(ApiError::validation("message content must not be empty"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatMessageWire,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ChatCompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: ChatCompletionUsage,
}

impl ChatCompletionResponse {
    pub fn single_message(model: &str, content: String, usage: ChatCompletionUsage) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            object: "chat.completion",
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessageWire {
                    role: "assistant".to_string(),
                    content,
                },
                finish_reason: "stop",
            }],
            usage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AsyncJobResponse {
    pub object: &'static str,
    pub job_id: uuid::Uuid,
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelListEntry {
    pub id: String,
    pub object: &'static str,
    pub owned_by: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_selector() {
        assert_eq!(
            ModelSelector::parse("agent/responder").unwrap(),
            ModelSelector::Agent("responder".to_string())
        );
    }

    #[test]
    fn parses_async_workflow_before_plain_workflow() {
        assert_eq!(
            ModelSelector::parse("async/workflow/review").unwrap(),
            ModelSelector::AsyncWorkflow("review".to_string())
        );
    }

    #[test]
    fn parses_sync_workflow_selector() {
        assert_eq!(
            ModelSelector::parse("workflow/review").unwrap(),
            ModelSelector::Workflow("review".to_string())
        );
    }

    #[test]
    fn rejects_unknown_prefix() {
        let err = ModelSelector::parse("invalid-model").unwrap_err();
        assert!(err.message.contains("agent/"));
    }

    #[test]
    fn rejects_empty_messages() {
        let req = ChatCompletionRequest {
            model: "agent/responder".to_string(),
            messages: vec![],
            stream: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_empty_message_content() {
        let req = ChatCompletionRequest {
            model: "agent/responder".to_string(),
            messages: vec![ChatMessageWire {
                role: "user".to_string(),
                content: String::new(),
            }],
            stream: None,
        };
        assert!(req.validate().is_err());
    }
}
