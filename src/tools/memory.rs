//! Memory tool: a per-agent scratch key/value store, grounded on
//! `context::memory`'s role in the teacher (durable notes an agent keeps
//! across turns), simplified here to an in-process store since durable
//! cross-job agent memory is outside SPEC_FULL's core. Keyed by
//! `agent_id` so two agents (or two tenants' agents) never see each
//! other's scratch state (spec.md §9 "no hidden globals").

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::model::Tool as ToolConfig;

use super::{Tool, ToolError};

static SHARED_MEMORY: OnceLock<Mutex<HashMap<(Uuid, String), Value>>> = OnceLock::new();

fn shared_memory() -> &'static Mutex<HashMap<(Uuid, String), Value>> {
    SHARED_MEMORY.get_or_init(|| Mutex::new(HashMap::new()))
}

pub struct MemoryTool {
    config: ToolConfig,
    agent_id: Uuid,
}

impl MemoryTool {
    pub fn new(config: ToolConfig, agent_id: Uuid) -> Self {
        Self { config, agent_id }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum MemoryArgs {
    Get { key: String },
    Set { key: String, value: Value },
    Delete { key: String },
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: MemoryArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let mut shared = shared_memory().lock().unwrap();
        match args {
            MemoryArgs::Get { key } => {
                Ok(json!({ "value": shared.get(&(self.agent_id, key)).cloned() }))
            }
            MemoryArgs::Set { key, value } => {
                shared.insert((self.agent_id, key), value);
                Ok(json!({ "ok": true }))
            }
            MemoryArgs::Delete { key } => {
                let removed = shared.remove(&(self.agent_id, key)).is_some();
                Ok(json!({ "removed": removed }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ToolConfig {
        ToolConfig {
            id: Uuid::new_v4(),
            name: "scratch".to_string(),
            tool_type: crate::model::ToolType::Memory,
            config: json!({}),
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let tool = MemoryTool::new(config(), Uuid::new_v4());
        tool.execute(json!({ "op": "set", "key": "k1", "value": 42 }))
            .await
            .unwrap();
        let out = tool.execute(json!({ "op": "get", "key": "k1" })).await.unwrap();
        assert_eq!(out["value"], json!(42));
    }

    #[tokio::test]
    async fn delete_reports_whether_a_key_existed() {
        let tool = MemoryTool::new(config(), Uuid::new_v4());
        let out = tool
            .execute(json!({ "op": "delete", "key": "missing" }))
            .await
            .unwrap();
        assert_eq!(out["removed"], json!(false));
    }

    #[tokio::test]
    async fn two_agents_with_the_same_key_do_not_clobber_each_other() {
        let a = MemoryTool::new(config(), Uuid::new_v4());
        let b = MemoryTool::new(config(), Uuid::new_v4());

        a.execute(json!({ "op": "set", "key": "shared", "value": "a's value" }))
            .await
            .unwrap();
        b.execute(json!({ "op": "set", "key": "shared", "value": "b's value" }))
            .await
            .unwrap();

        let a_out = a.execute(json!({ "op": "get", "key": "shared" })).await.unwrap();
        let b_out = b.execute(json!({ "op": "get", "key": "shared" })).await.unwrap();
        assert_eq!(a_out["value"], json!("a's value"));
        assert_eq!(b_out["value"], json!("b's value"));
    }
}
