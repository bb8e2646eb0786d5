//! A generic OpenAI-Chat-Completions-shaped `LlmProvider`, built against
//! an arbitrary `base_url`/`api_key` pair resolved per-call from the
//! primitive store (unlike the teacher's two compiled-in providers).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::model::{Provider, Tool};

use super::{ChatMessage, CompletionOutcome, CompletionResponse, LlmError, LlmProvider, ToolCall, Usage};

pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpLlmProvider {
    pub fn new(client: reqwest::Client, provider: &Provider) -> Self {
        Self {
            client,
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            api_key: provider.api_key.clone(),
        }
    }

    async fn send(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<CompletionResponse, LlmError> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire_messages.push(ChatMessage::system(system_prompt));
        }
        wire_messages.extend(messages.iter().cloned());

        let mut body = json!({
            "model": model,
            "messages": wire_messages,
        });

        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools.iter().map(tool_to_wire).collect();
            body["tools"] = json!(wire_tools);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let outcome = if let Some(tool_calls) = choice.message.tool_calls {
            CompletionOutcome::ToolCalls(
                tool_calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: serde_json::from_str(&tc.function.arguments)
                            .unwrap_or(serde_json::Value::Null),
                    })
                    .collect(),
            )
        } else {
            CompletionOutcome::Message(choice.message.content.unwrap_or_default())
        };

        Ok(CompletionResponse {
            outcome,
            usage: Usage {
                prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
                completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
            },
        })
    }
}

fn tool_to_wire(tool: &Tool) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": format!("{} tool", tool.tool_type),
            "parameters": tool.config,
        }
    })
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionResponse, LlmError> {
        self.send(model, system_prompt, messages, &[]).await
    }

    async fn complete_with_tools(
        &self,
        model: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<CompletionResponse, LlmError> {
        self.send(model, system_prompt, messages, tools).await
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UpstreamUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: UpstreamMessage,
}

#[derive(Debug, Deserialize)]
struct UpstreamMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<UpstreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct UpstreamToolCall {
    id: String,
    function: UpstreamFunctionCall,
}

#[derive(Debug, Deserialize)]
struct UpstreamFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct UpstreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_message_response() {
        let raw = r#"{"choices":[{"message":{"content":"hello"}}],"usage":{"prompt_tokens":3,"completion_tokens":1}}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 3);
    }

    #[test]
    fn parses_a_tool_call_response() {
        let raw = r#"{"choices":[{"message":{"content":null,"tool_calls":[{"id":"call_1","function":{"name":"lookup","arguments":"{\"q\":\"x\"}"}}]}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let tool_calls = parsed.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls[0].function.name, "lookup");
    }
}
