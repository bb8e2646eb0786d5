//! Core data entities (spec §3).
//!
//! Plain records following the teacher's `history::store` style: derive
//! `Serialize`/`Deserialize`, `chrono::DateTime<Utc>` timestamps,
//! `Option<T>` for nullable columns, `serde_json::Value` for open-ended
//! JSON trees (`input_data`/`output_data`/`config`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An upstream LLM endpoint descriptor. Immutable from the engine's view;
/// `api_key` is treated as an opaque, already-decrypted string (encryption
/// at rest is the primitive store's concern, not the engine's — see
/// SPEC_FULL.md §9 Open Question 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
}

/// A prompted LLM persona bound to a provider and model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub provider_id: Uuid,
    pub model_id: String,
    pub system_prompt: String,
    pub tool_ids: Vec<Uuid>,
}

/// A named capability exposed to agents during generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    Http,
    Database,
    Memory,
    Filesystem,
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolType::Http => "http",
            ToolType::Database => "database",
            ToolType::Memory => "memory",
            ToolType::Filesystem => "filesystem",
        };
        f.write_str(s)
    }
}

impl FromStr for ToolType {
    type Err = ModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(ToolType::Http),
            "database" => Ok(ToolType::Database),
            "memory" => Ok(ToolType::Memory),
            "filesystem" => Ok(ToolType::Filesystem),
            other => Err(ModelParseError::UnknownVariant {
                field: "tool_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: Uuid,
    pub name: String,
    pub tool_type: ToolType,
    pub config: serde_json::Value,
}

/// A named ordered chain of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub is_async: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Agent,
    Wasm,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepType::Agent => "agent",
            StepType::Wasm => "wasm",
        })
    }
}

impl FromStr for StepType {
    type Err = ModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(StepType::Agent),
            "wasm" => Ok(StepType::Wasm),
            other => Err(ModelParseError::UnknownVariant {
                field: "step_type",
                value: other.to_string(),
            }),
        }
    }
}

/// How a step's predecessor output is fed into this step (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputMapping {
    UseAsPrompt,
    AppendToPrompt,
    UseAsContext,
    UseAsInstructions,
    UseAsCodeInput,
    UseAsReviewTarget,
}

impl FromStr for InputMapping {
    type Err = ModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "useAsPrompt" => Ok(InputMapping::UseAsPrompt),
            "appendToPrompt" => Ok(InputMapping::AppendToPrompt),
            "useAsContext" => Ok(InputMapping::UseAsContext),
            "useAsInstructions" => Ok(InputMapping::UseAsInstructions),
            "useAsCodeInput" => Ok(InputMapping::UseAsCodeInput),
            "useAsReviewTarget" => Ok(InputMapping::UseAsReviewTarget),
            other => Err(ModelParseError::UnknownVariant {
                field: "input_mapping",
                value: other.to_string(),
            }),
        }
    }
}

/// The closed set of carry keys a step's result may land in (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputField {
    GeneratedText,
    ExtractedCode,
    Summary,
    ActionItems,
    SuggestedChanges,
    ReviewComments,
    TestCases,
    DocumentationText,
}

impl OutputField {
    pub fn carry_key(self) -> &'static str {
        match self {
            OutputField::GeneratedText => "generatedText",
            OutputField::ExtractedCode => "extractedCode",
            OutputField::Summary => "summary",
            OutputField::ActionItems => "actionItems",
            OutputField::SuggestedChanges => "suggestedChanges",
            OutputField::ReviewComments => "reviewComments",
            OutputField::TestCases => "testCases",
            OutputField::DocumentationText => "documentationText",
        }
    }
}

impl FromStr for OutputField {
    type Err = ModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generatedText" => Ok(OutputField::GeneratedText),
            "extractedCode" => Ok(OutputField::ExtractedCode),
            "summary" => Ok(OutputField::Summary),
            "actionItems" => Ok(OutputField::ActionItems),
            "suggestedChanges" => Ok(OutputField::SuggestedChanges),
            "reviewComments" => Ok(OutputField::ReviewComments),
            "testCases" => Ok(OutputField::TestCases),
            "documentationText" => Ok(OutputField::DocumentationText),
            other => Err(ModelParseError::UnknownVariant {
                field: "output_field",
                value: other.to_string(),
            }),
        }
    }
}

/// An entry in a workflow's ordered step list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_order: i32,
    pub step_type: StepType,
    pub agent_id: Option<Uuid>,
    pub wasm_module_id: Option<Uuid>,
    pub input_mapping: InputMapping,
    pub output_field: OutputField,
    pub config: serde_json::Value,
}

/// A compiled WASM artifact. The engine only ever reads `module_bytes`.
#[derive(Clone, Serialize, Deserialize)]
pub struct WasmModule {
    pub id: Uuid,
    pub name: String,
    pub module_bytes: Vec<u8>,
}

impl fmt::Debug for WasmModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmModule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("module_bytes_len", &self.module_bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(ModelParseError::UnknownVariant {
                field: "job_status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl JobStepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStepStatus::Pending => "pending",
            JobStepStatus::Running => "running",
            JobStepStatus::Completed => "completed",
            JobStepStatus::Failed => "failed",
            JobStepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStepStatus {
    type Err = ModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStepStatus::Pending),
            "running" => Ok(JobStepStatus::Running),
            "completed" => Ok(JobStepStatus::Completed),
            "failed" => Ok(JobStepStatus::Failed),
            "skipped" => Ok(JobStepStatus::Skipped),
            other => Err(ModelParseError::UnknownVariant {
                field: "job_step_status",
                value: other.to_string(),
            }),
        }
    }
}

/// An execution instance of a workflow (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: JobStatus,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(workflow_id: Uuid, input_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: JobStatus::Queued,
            input_data,
            output_data: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// A per-step execution record within a job (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStep {
    pub id: Uuid,
    pub job_id: Uuid,
    pub workflow_step_id: Uuid,
    pub status: JobStepStatus,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobStep {
    pub fn pending(job_id: Uuid, workflow_step_id: Uuid, input_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            workflow_step_id,
            status: JobStepStatus::Pending,
            input_data,
            output_data: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// A binary output persisted against a job. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Error parsing a stored string into one of the model's closed enums.
#[derive(Debug, thiserror::Error)]
pub enum ModelParseError {
    #[error("unknown {field} value: {value}")]
    UnknownVariant { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn terminal_statuses_are_flagged() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "bogus".parse::<JobStatus>().unwrap_err();
        assert!(matches!(err, ModelParseError::UnknownVariant { .. }));
    }

    #[test]
    fn output_field_carry_keys_match_closed_set() {
        assert_eq!(OutputField::GeneratedText.carry_key(), "generatedText");
        assert_eq!(OutputField::TestCases.carry_key(), "testCases");
    }

    #[test]
    fn new_job_starts_queued_with_no_terminal_timestamps() {
        let job = Job::new(Uuid::new_v4(), serde_json::json!({"hello": "world"}));
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }
}
