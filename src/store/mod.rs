//! Job Store (C1) and Primitive Store (C2) contracts.
//!
//! Split as two traits over one connection pool, matching the teacher's
//! single `Store` struct owning conversations, sandbox jobs, routines and
//! settings together (`history/store.rs`).

pub mod postgres;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Agent, Artifact, Job, JobStep, Provider, Tool, WasmModule, Workflow, WorkflowStep};

/// Error taxonomy for both stores, converted to the shared HTTP shape by
/// callers (engine, gateway) rather than here — this module stays free of
/// any axum dependency, matching the teacher's `DatabaseError`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(#[from] tokio_postgres::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("stored value parse error: {0}")]
    Parse(#[from] crate::model::ModelParseError),

    #[error("migration error: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable queue + step journal + artifact blob table (spec §4.1).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<()>;

    /// Atomically select the oldest `queued` job, transition it to
    /// `running`, set `started_at`, and return it. Returns `None` if no
    /// job is queued. Must be serializable against concurrent callers.
    async fn claim_next_queued(&self) -> Result<Option<Job>>;

    /// Reject if the job is already in a terminal state; idempotent if
    /// called twice with the same outcome.
    async fn mark_completed(&self, job_id: Uuid, output: Value) -> Result<()>;
    async fn mark_failed(&self, job_id: Uuid, err: &str) -> Result<()>;
    async fn mark_cancelled(&self, job_id: Uuid) -> Result<()>;

    async fn append_step(&self, step: &JobStep) -> Result<()>;
    async fn update_step(&self, step: &JobStep) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Job>;
    async fn list_jobs(&self) -> Result<Vec<Job>>;
    async fn list_steps(&self, job_id: Uuid) -> Result<Vec<JobStep>>;

    async fn create_artifact(&self, artifact: &Artifact) -> Result<()>;
    async fn list_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>>;

    /// Crash recovery: transition every `running` job back to `queued` and
    /// fail their `running` steps with `engine_restart`. Called once at
    /// engine startup, before the poll loop begins (spec §4.1).
    async fn requeue_stuck_running(&self) -> Result<Vec<Job>>;

    /// Liveness probe backing `GET /health`.
    async fn ping(&self) -> Result<()>;
}

/// Read-mostly directory of Providers/Agents/Workflows/WorkflowSteps/Tools
/// (spec §4.2). Lookup-by-name is case-insensitive.
#[async_trait]
pub trait PrimitiveStore: Send + Sync {
    async fn get_provider(&self, id: Uuid) -> Result<Provider>;

    async fn get_agent(&self, id: Uuid) -> Result<Agent>;
    async fn get_agent_by_name(&self, name: &str) -> Result<Agent>;
    async fn list_agents(&self) -> Result<Vec<Agent>>;

    async fn get_workflow(&self, id: Uuid) -> Result<Workflow>;
    async fn get_workflow_by_name(&self, name: &str) -> Result<Workflow>;
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;
    async fn list_workflow_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>>;

    async fn get_tool(&self, id: Uuid) -> Result<Tool>;
    async fn list_tools_for_agent(&self, agent_id: Uuid) -> Result<Vec<Tool>>;

    async fn get_wasm_module(&self, id: Uuid) -> Result<WasmModule>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
}
