//! Database tool: runs a parameterized read query against a connection
//! string named in the tool's config, grounded on the teacher's posture
//! of wrapping `tokio_postgres` directly rather than through an ORM
//! (`history/store.rs`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_postgres::NoTls;

use crate::model::Tool as ToolConfig;

use super::{Tool, ToolError};

pub struct DatabaseTool {
    config: ToolConfig,
}

impl DatabaseTool {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Deserialize)]
struct DatabaseArgs {
    query: String,
}

const WRITE_KEYWORDS: &[&str] = &["insert", "update", "delete", "drop", "alter", "truncate"];

#[async_trait]
impl Tool for DatabaseTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: DatabaseArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let lowered = args.query.to_lowercase();
        if WRITE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            return Err(ToolError::InvalidParameters(
                "database tool is restricted to read queries".to_string(),
            ));
        }

        let conn_str = self
            .config
            .config
            .get("connection_string")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::ExecutionFailed("tool is missing connection_string".to_string()))?;

        let (client, connection) = tokio_postgres::connect(conn_str, NoTls)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "database tool connection closed with error");
            }
        });

        let rows = client
            .query(&args.query, &[])
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        Ok(json!({ "columns": columns, "row_count": rows.len() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config() -> ToolConfig {
        ToolConfig {
            id: Uuid::new_v4(),
            name: "reporting_db".to_string(),
            tool_type: crate::model::ToolType::Database,
            config: json!({ "connection_string": "postgres://localhost/reporting" }),
        }
    }

    #[tokio::test]
    async fn rejects_write_queries() {
        let tool = DatabaseTool::new(config());
        let err = tool
            .execute(json!({ "query": "DELETE FROM users" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn missing_connection_string_fails_cleanly() {
        let mut cfg = config();
        cfg.config = json!({});
        let tool = DatabaseTool::new(cfg);
        let err = tool
            .execute(json!({ "query": "SELECT 1" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }
}
