//! In-memory store doubles for unit tests that don't need a real database,
//! mirroring the teacher's `StubLlm`-style test doubles in
//! `orchestrator/api.rs`'s test module.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{
    Agent, Artifact, Job, JobStatus, JobStep, JobStepStatus, Provider, Tool, WasmModule, Workflow,
    WorkflowStep,
};

use super::{JobStore, PrimitiveStore, Result, StoreError};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    steps: HashMap<Uuid, JobStep>,
    artifacts: Vec<Artifact>,
}

/// A `JobStore` backed by an in-process `Mutex<HashMap>`, good enough for
/// the engine's unit tests. Claim order matches insertion order
/// (`created_at` ascending), same as the Postgres implementation.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{kind} {id} not found"))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn claim_next_queued(&self) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().unwrap();
        let next_id = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by_key(|j| j.created_at)
            .map(|j| j.id);

        let Some(id) = next_id else {
            return Ok(None);
        };

        let job = inner.jobs.get_mut(&id).unwrap();
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, job_id: Uuid, output: Value) -> Result<()> {
        self.mark_terminal(job_id, JobStatus::Completed, Some(output), None)
    }

    async fn mark_failed(&self, job_id: Uuid, err: &str) -> Result<()> {
        self.mark_terminal(job_id, JobStatus::Failed, None, Some(err.to_string()))
    }

    async fn mark_cancelled(&self, job_id: Uuid) -> Result<()> {
        self.mark_terminal(job_id, JobStatus::Cancelled, None, None)
    }

    async fn append_step(&self, step: &JobStep) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.steps.insert(step.id, step.clone());
        Ok(())
    }

    async fn update_step(&self, step: &JobStep) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.steps.contains_key(&step.id) {
            return Err(not_found("job_step", step.id));
        }
        inner.steps.insert(step.id, step.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Job> {
        let inner = self.inner.lock().unwrap();
        inner.jobs.get(&id).cloned().ok_or_else(|| not_found("job", id))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let inner = self.inner.lock().unwrap();
        let mut jobs: Vec<Job> = inner.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| std::cmp::Reverse(j.created_at));
        Ok(jobs)
    }

    async fn list_steps(&self, job_id: Uuid) -> Result<Vec<JobStep>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .steps
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn create_artifact(&self, artifact: &Artifact) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.artifacts.push(artifact.clone());
        Ok(())
    }

    async fn list_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .artifacts
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn requeue_stuck_running(&self) -> Result<Vec<Job>> {
        let mut inner = self.inner.lock().unwrap();
        let running_job_ids: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .map(|j| j.id)
            .collect();

        for step in inner.steps.values_mut() {
            if running_job_ids.contains(&step.job_id) && step.status == JobStepStatus::Running {
                step.status = JobStepStatus::Failed;
                step.error = Some("engine_restart".to_string());
                step.completed_at = Some(Utc::now());
            }
        }

        let mut requeued = Vec::new();
        for id in &running_job_ids {
            let job = inner.jobs.get_mut(id).unwrap();
            job.status = JobStatus::Queued;
            job.started_at = None;
            requeued.push(job.clone());
        }
        Ok(requeued)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

impl MemoryJobStore {
    fn mark_terminal(
        &self,
        job_id: Uuid,
        status: JobStatus,
        output: Option<Value>,
        err: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| not_found("job", job_id))?;

        if job.status.is_terminal() {
            if job.status == status {
                return Ok(());
            }
            return Err(StoreError::Conflict(format!(
                "job {job_id} already terminal as {}",
                job.status
            )));
        }

        job.status = status;
        if output.is_some() {
            job.output_data = output;
        }
        job.error = err;
        job.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// A `PrimitiveStore` backed by in-process maps, seeded by tests via its
/// `insert_*` helpers.
#[derive(Default)]
pub struct MemoryPrimitiveStore {
    providers: Mutex<HashMap<Uuid, Provider>>,
    agents: Mutex<HashMap<Uuid, Agent>>,
    workflows: Mutex<HashMap<Uuid, Workflow>>,
    workflow_steps: Mutex<HashMap<Uuid, Vec<WorkflowStep>>>,
    tools: Mutex<HashMap<Uuid, Tool>>,
    wasm_modules: Mutex<HashMap<Uuid, WasmModule>>,
    settings: Mutex<HashMap<String, String>>,
}

impl MemoryPrimitiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_provider(&self, provider: Provider) {
        self.providers.lock().unwrap().insert(provider.id, provider);
    }

    pub fn insert_agent(&self, agent: Agent) {
        self.agents.lock().unwrap().insert(agent.id, agent);
    }

    pub fn insert_workflow(&self, workflow: Workflow, steps: Vec<WorkflowStep>) {
        let id = workflow.id;
        self.workflows.lock().unwrap().insert(id, workflow);
        self.workflow_steps.lock().unwrap().insert(id, steps);
    }

    pub fn insert_tool(&self, tool: Tool) {
        self.tools.lock().unwrap().insert(tool.id, tool);
    }

    pub fn insert_wasm_module(&self, module: WasmModule) {
        self.wasm_modules.lock().unwrap().insert(module.id, module);
    }

    pub fn insert_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.lock().unwrap().insert(key.into(), value.into());
    }
}

#[async_trait]
impl PrimitiveStore for MemoryPrimitiveStore {
    async fn get_provider(&self, id: Uuid) -> Result<Provider> {
        self.providers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("provider", id))
    }

    async fn get_agent(&self, id: Uuid) -> Result<Agent> {
        self.agents
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("agent", id))
    }

    async fn get_agent_by_name(&self, name: &str) -> Result<Agent> {
        self.agents
            .lock()
            .unwrap()
            .values()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| not_found("agent", name))
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        Ok(self.agents.lock().unwrap().values().cloned().collect())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Workflow> {
        self.workflows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("workflow", id))
    }

    async fn get_workflow_by_name(&self, name: &str) -> Result<Workflow> {
        self.workflows
            .lock()
            .unwrap()
            .values()
            .find(|w| w.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| not_found("workflow", name))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.lock().unwrap().values().cloned().collect())
    }

    async fn list_workflow_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>> {
        let mut steps = self
            .workflow_steps
            .lock()
            .unwrap()
            .get(&workflow_id)
            .cloned()
            .unwrap_or_default();
        steps.sort_by_key(|s| (s.step_order, s.id));
        Ok(steps)
    }

    async fn get_tool(&self, id: Uuid) -> Result<Tool> {
        self.tools
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("tool", id))
    }

    async fn list_tools_for_agent(&self, agent_id: Uuid) -> Result<Vec<Tool>> {
        let agent = self.get_agent(agent_id).await?;
        let tools = self.tools.lock().unwrap();
        Ok(agent
            .tool_ids
            .iter()
            .filter_map(|id| tools.get(id).cloned())
            .collect())
    }

    async fn get_wasm_module(&self, id: Uuid) -> Result<WasmModule> {
        self.wasm_modules
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("wasm_module", id))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.settings.lock().unwrap().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_next_queued_returns_oldest_first() {
        let store = MemoryJobStore::new();
        let workflow_id = Uuid::new_v4();

        let mut first = Job::new(workflow_id, serde_json::json!({}));
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = Job::new(workflow_id, serde_json::json!({}));

        store.create_job(&second).await.unwrap();
        store.create_job(&first).await.unwrap();

        let claimed = store.claim_next_queued().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn claim_next_queued_is_exclusive() {
        let store = MemoryJobStore::new();
        let job = Job::new(Uuid::new_v4(), serde_json::json!({}));
        store.create_job(&job).await.unwrap();

        let first_claim = store.claim_next_queued().await.unwrap();
        let second_claim = store.claim_next_queued().await.unwrap();

        assert!(first_claim.is_some());
        assert!(second_claim.is_none());
    }

    #[tokio::test]
    async fn mark_completed_twice_is_idempotent() {
        let store = MemoryJobStore::new();
        let job = Job::new(Uuid::new_v4(), serde_json::json!({}));
        store.create_job(&job).await.unwrap();
        store.claim_next_queued().await.unwrap();

        store
            .mark_completed(job.id, serde_json::json!({"ok": true}))
            .await
            .unwrap();
        store
            .mark_completed(job.id, serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let stored = store.get_job(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn mark_failed_after_completed_is_a_conflict() {
        let store = MemoryJobStore::new();
        let job = Job::new(Uuid::new_v4(), serde_json::json!({}));
        store.create_job(&job).await.unwrap();
        store.mark_completed(job.id, serde_json::json!({})).await.unwrap();

        let err = store.mark_failed(job.id, "boom").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn requeue_stuck_running_resets_status_and_fails_running_steps() {
        let store = MemoryJobStore::new();
        let job = Job::new(Uuid::new_v4(), serde_json::json!({}));
        store.create_job(&job).await.unwrap();
        store.claim_next_queued().await.unwrap();

        let mut step = JobStep::pending(job.id, Uuid::new_v4(), serde_json::json!({}));
        step.status = JobStepStatus::Running;
        store.append_step(&step).await.unwrap();

        let requeued = store.requeue_stuck_running().await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].status, JobStatus::Queued);

        let steps = store.list_steps(job.id).await.unwrap();
        assert_eq!(steps[0].status, JobStepStatus::Failed);
        assert_eq!(steps[0].error.as_deref(), Some("engine_restart"));
    }

    #[tokio::test]
    async fn primitive_store_lookup_by_name_is_case_insensitive() {
        let store = MemoryPrimitiveStore::new();
        store.insert_agent(Agent {
            id: Uuid::new_v4(),
            name: "Summarizer".to_string(),
            provider_id: Uuid::new_v4(),
            model_id: "gpt-x".to_string(),
            system_prompt: "Summarize input.".to_string(),
            tool_ids: vec![],
        });

        let found = store.get_agent_by_name("summarizer").await.unwrap();
        assert_eq!(found.name, "Summarizer");
    }
}
