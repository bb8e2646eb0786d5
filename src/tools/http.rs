//! HTTP tool: outbound request on the agent's behalf, grounded on
//! `tools/builtin/http.rs`'s request-building/response-shaping style.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::model::Tool as ToolConfig;

use super::{Tool, ToolError};

pub struct HttpTool {
    client: reqwest::Client,
    config: ToolConfig,
}

impl HttpTool {
    pub fn new(client: reqwest::Client, config: ToolConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Debug, Deserialize)]
struct HttpArgs {
    method: Option<String>,
    url: String,
    #[serde(default)]
    body: Option<Value>,
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: HttpArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let allowed_prefix = self
            .config
            .config
            .get("base_url")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !allowed_prefix.is_empty() && !args.url.starts_with(allowed_prefix) {
            return Err(ToolError::InvalidParameters(format!(
                "url '{}' is outside the tool's configured base_url",
                args.url
            )));
        }

        let method = args
            .method
            .as_deref()
            .unwrap_or("GET")
            .parse::<reqwest::Method>()
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let mut req = self.client.request(method, &args.url);
        if let Some(body) = &args.body {
            req = req.json(body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(json!({ "status": status, "body": text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config() -> ToolConfig {
        ToolConfig {
            id: Uuid::new_v4(),
            name: "web_fetch".to_string(),
            tool_type: crate::model::ToolType::Http,
            config: json!({ "base_url": "https://api.example.com" }),
        }
    }

    #[tokio::test]
    async fn rejects_urls_outside_configured_base() {
        let tool = HttpTool::new(reqwest::Client::new(), config());
        let err = tool
            .execute(json!({ "url": "https://evil.example.com/steal" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn rejects_invalid_method() {
        let tool = HttpTool::new(reqwest::Client::new(), config());
        let err = tool
            .execute(json!({ "url": "https://api.example.com/x", "method": "  " }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
