//! Workflow Engine (C5): the claim-run-record loop, grounded on the
//! single-coordinator-struct shape of `sandbox::manager::SandboxManager`
//! (one struct owning sub-resources, an idempotent `start`, an
//! `AtomicBool` double-start guard).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentError, AgentRunner};
use crate::hub::Hub;
use crate::llm::ChatMessage;
use crate::model::{
    Artifact, Job, JobStatus, JobStep, JobStepStatus, OutputField, StepType, WorkflowStep,
};
use crate::store::{JobStore, PrimitiveStore, StoreError};
use crate::wasm::{RecursiveExecutor, ResourceLimits, WasmRuntime};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("workflow execution failed: {0}")]
    ExecutionFailed(String),
}

impl From<AgentError> for EngineError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::NotFound(m) => EngineError::NotFound(m),
            AgentError::ExecutionFailed(m) => EngineError::ExecutionFailed(m),
        }
    }
}

/// Tunables carried over from `Config`, copied out so the engine doesn't
/// hold a `clap` dependency.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: std::time::Duration,
    pub timeout_workflow: std::time::Duration,
    pub timeout_step: std::time::Duration,
    pub max_recursion_depth: u32,
    pub max_tool_iterations: u32,
}

pub struct Engine {
    job_store: Arc<dyn JobStore>,
    primitive_store: Arc<dyn PrimitiveStore>,
    wasm_runtime: Arc<WasmRuntime>,
    hub: Arc<Hub>,
    http_client: reqwest::Client,
    config: EngineConfig,

    shutdown: CancellationToken,
    started: AtomicBool,
    loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        primitive_store: Arc<dyn PrimitiveStore>,
        wasm_runtime: Arc<WasmRuntime>,
        hub: Arc<Hub>,
        http_client: reqwest::Client,
        config: EngineConfig,
    ) -> Self {
        Self {
            job_store,
            primitive_store,
            wasm_runtime,
            hub,
            http_client,
            config,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            loop_handle: std::sync::Mutex::new(None),
        }
    }

    fn agent_runner(&self) -> AgentRunner {
        let tools = Arc::new(crate::tools::ToolRegistry::new(
            self.primitive_store.clone(),
            self.http_client.clone(),
        ));
        AgentRunner::new(
            self.primitive_store.clone(),
            tools,
            self.http_client.clone(),
            self.config.max_tool_iterations,
        )
    }

    /// Spawn the poll loop. Idempotent: a second call is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Crash recovery before the loop begins (spec §4.1).
        let requeued = self.job_store.requeue_stuck_running().await?;
        for job in &requeued {
            self.hub.publish(
                "job_update",
                serde_json::json!({ "job_id": job.id, "status": job.status.as_str() }),
            );
        }

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.poll_loop().await });
        *self.loop_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            match self.job_store.claim_next_queued().await {
                Ok(Some(job)) => {
                    self.hub.publish(
                        "job_update",
                        serde_json::json!({ "job_id": job.id, "status": "running" }),
                    );
                    if let Err(e) = self.run_job(job.clone()).await {
                        tracing::error!(job_id = %job.id, error = %e, "job run failed");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = self.shutdown.cancelled() => return,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to claim next queued job");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = self.shutdown.cancelled() => return,
                    }
                }
            }
        }
    }

    /// Resolve an agent by name and run it once, synchronously. Used by
    /// the dispatcher's `agent/<name>` path (spec §4.6).
    pub async fn run_agent(
        &self,
        name: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<crate::agent::AgentOutput, EngineError> {
        let agent = self.primitive_store.get_agent_by_name(name).await?;
        let runner = self.agent_runner();
        Ok(runner.run(&agent, messages).await?)
    }

    /// Resolve a workflow by name and run it to completion synchronously.
    /// Used by the dispatcher's `workflow/<name>` path (spec §4.6).
    pub async fn execute_now_by_name(&self, name: &str, input: Value) -> Result<Value, EngineError> {
        let workflow = self.primitive_store.get_workflow_by_name(name).await?;
        self.execute_now(workflow.id, input).await
    }

    /// Resolve a workflow by name and submit a job. Used by the
    /// dispatcher's `async/workflow/<name>` path (spec §4.6).
    pub async fn submit_by_name(&self, name: &str, input: Value) -> Result<Job, EngineError> {
        let workflow = self.primitive_store.get_workflow_by_name(name).await?;
        self.submit(workflow.id, input).await
    }

    pub async fn submit(&self, workflow_id: Uuid, input: Value) -> Result<Job, EngineError> {
        // Validate the workflow exists before accepting the job.
        self.primitive_store.get_workflow(workflow_id).await?;
        let job = Job::new(workflow_id, input);
        self.job_store.create_job(&job).await?;
        Ok(job)
    }

    /// Synchronous execution used by the dispatcher's `workflow/<name>`
    /// path and by WASM `execute_target` recursion.
    pub async fn execute_now(&self, workflow_id: Uuid, input: Value) -> Result<Value, EngineError> {
        self.execute_now_recursive(workflow_id, input, 0).await
    }

    async fn execute_now_recursive(
        &self,
        workflow_id: Uuid,
        input: Value,
        depth: u32,
    ) -> Result<Value, EngineError> {
        let workflow = self.primitive_store.get_workflow(workflow_id).await?;
        let steps = self.primitive_store.list_workflow_steps(workflow.id).await?;
        let deadline = self.config.timeout_workflow;
        let cancel = self.shutdown.child_token();

        tokio::time::timeout(deadline, self.run_steps(&steps, input, depth, &cancel))
            .await
            .map_err(|_| EngineError::ExecutionFailed("workflow timed out".to_string()))?
    }

    async fn run_job(self: &Arc<Self>, job: Job) -> Result<(), EngineError> {
        let steps = self
            .primitive_store
            .list_workflow_steps(job.workflow_id)
            .await?;
        let cancel = self.shutdown.child_token();

        let outcome = tokio::time::timeout(
            self.config.timeout_workflow,
            self.run_job_steps(&job, &steps, &cancel),
        )
        .await;

        match outcome {
            Ok(Ok(output)) => {
                self.job_store.mark_completed(job.id, output).await?;
                self.hub.publish(
                    "job_update",
                    serde_json::json!({ "job_id": job.id, "status": "completed" }),
                );
            }
            Ok(Err(e)) => {
                self.job_store.mark_failed(job.id, &e.to_string()).await?;
                self.hub.publish(
                    "job_update",
                    serde_json::json!({ "job_id": job.id, "status": "failed", "error": e.to_string() }),
                );
            }
            Err(_) => {
                self.job_store
                    .mark_failed(job.id, "workflow timed out")
                    .await?;
                self.hub.publish(
                    "job_update",
                    serde_json::json!({ "job_id": job.id, "status": "failed", "error": "timeout" }),
                );
            }
        }
        Ok(())
    }

    /// Drives one job's steps, journaling `JobStep` rows against the real
    /// job id as it goes (used by the poll loop, not by pure `execute_now`
    /// recursion which has no job row of its own — see `run_steps`).
    async fn run_job_steps(
        &self,
        job: &Job,
        steps: &[WorkflowStep],
        cancel: &CancellationToken,
    ) -> Result<Value, EngineError> {
        let mut carry = Carry::seeded(&job.input_data);
        let mut previous_output: Option<String> = None;

        for (idx, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                self.job_store.mark_cancelled(job.id).await?;
                return Err(EngineError::ExecutionFailed("cancelled".to_string()));
            }

            if idx > 0 {
                if let Some(prev) = &previous_output {
                    carry.apply_mapping(step.input_mapping, prev);
                }
            }

            let mut job_step = JobStep::pending(job.id, step.id, carry.render_for(step));
            job_step.status = JobStepStatus::Running;
            job_step.started_at = Some(chrono::Utc::now());
            self.job_store.append_step(&job_step).await?;
            self.hub.publish(
                "job_step_update",
                serde_json::json!({ "job_id": job.id, "step_id": job_step.id, "status": "running" }),
            );

            let dispatch = self.dispatch_step(step, &carry, 0, cancel).await;

            match dispatch {
                Ok((text, value)) => {
                    carry.fields.insert(step.output_field.carry_key().to_string(), value.clone());
                    previous_output = Some(text);

                    job_step.status = JobStepStatus::Completed;
                    job_step.output_data = Some(value);
                    job_step.completed_at = Some(chrono::Utc::now());
                    self.job_store.update_step(&job_step).await?;
                    self.hub.publish(
                        "job_step_update",
                        serde_json::json!({ "job_id": job.id, "step_id": job_step.id, "status": "completed" }),
                    );
                }
                Err(e) => {
                    job_step.status = JobStepStatus::Failed;
                    job_step.error = Some(e.to_string());
                    job_step.completed_at = Some(chrono::Utc::now());
                    self.job_store.update_step(&job_step).await?;
                    self.hub.publish(
                        "job_step_update",
                        serde_json::json!({ "job_id": job.id, "step_id": job_step.id, "status": "failed" }),
                    );

                    self.skip_remaining(job.id, steps, idx + 1).await?;
                    return Err(e);
                }
            }
        }

        Ok(Value::Object(carry.fields))
    }

    async fn skip_remaining(&self, job_id: Uuid, steps: &[WorkflowStep], from: usize) -> Result<(), EngineError> {
        for step in &steps[from..] {
            let mut skipped = JobStep::pending(job_id, step.id, Value::Null);
            skipped.status = JobStepStatus::Skipped;
            self.job_store.append_step(&skipped).await?;
        }
        Ok(())
    }

    /// Recursion-only step driver: no `Job`/`JobStep` rows, used for
    /// `execute_now` (no caller-visible job) and for nested
    /// `execute_target("workflow", ...)` calls from WASM.
    async fn run_steps(
        &self,
        steps: &[WorkflowStep],
        input: Value,
        depth: u32,
        cancel: &CancellationToken,
    ) -> Result<Value, EngineError> {
        let mut carry = Carry::seeded(&input);
        let mut previous_output: Option<String> = None;

        for (idx, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::ExecutionFailed("cancelled".to_string()));
            }
            if idx > 0 {
                if let Some(prev) = &previous_output {
                    carry.apply_mapping(step.input_mapping, prev);
                }
            }
            let (text, value) = self.dispatch_step(step, &carry, depth, cancel).await?;
            carry.fields.insert(step.output_field.carry_key().to_string(), value);
            previous_output = Some(text);
        }

        Ok(Value::Object(carry.fields))
    }

    async fn dispatch_step(
        &self,
        step: &WorkflowStep,
        carry: &Carry,
        depth: u32,
        cancel: &CancellationToken,
    ) -> Result<(String, Value), EngineError> {
        let step_timeout = self.config.timeout_step;
        let result = tokio::time::timeout(step_timeout, async {
            match step.step_type {
                StepType::Agent => self.run_agent_step(step, carry).await,
                StepType::Wasm => self.run_wasm_step(step, carry, depth, cancel).await,
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(EngineError::ExecutionFailed("step timed out".to_string())),
        }
    }

    async fn run_agent_step(&self, step: &WorkflowStep, carry: &Carry) -> Result<(String, Value), EngineError> {
        let agent_id = step
            .agent_id
            .ok_or_else(|| EngineError::ExecutionFailed("agent step missing agent_id".to_string()))?;
        let agent = self.primitive_store.get_agent(agent_id).await?;
        let runner = self.agent_runner();
        let prompt = carry.render_prompt();
        let output = runner.run(&agent, vec![ChatMessage::user(prompt)]).await?;
        Ok((output.text.clone(), Value::String(output.text)))
    }

    async fn run_wasm_step(
        &self,
        step: &WorkflowStep,
        carry: &Carry,
        depth: u32,
        cancel: &CancellationToken,
    ) -> Result<(String, Value), EngineError> {
        let module_id = step
            .wasm_module_id
            .ok_or_else(|| EngineError::ExecutionFailed("wasm step missing wasm_module_id".to_string()))?;
        let module = self.primitive_store.get_wasm_module(module_id).await?;

        let executor: Arc<dyn RecursiveExecutor> = Arc::new(StepExecutor {
            primitive_store: self.primitive_store.clone(),
            http_client: self.http_client.clone(),
            handle: tokio::runtime::Handle::current(),
            engine_handle: EngineHandle {
                job_store: self.job_store.clone(),
                primitive_store: self.primitive_store.clone(),
                wasm_runtime: self.wasm_runtime.clone(),
                hub: self.hub.clone(),
                http_client: self.http_client.clone(),
                config: self.config.clone(),
                shutdown: self.shutdown.clone(),
            },
            depth,
            max_depth: self.config.max_recursion_depth,
        });

        let value = self
            .wasm_runtime
            .execute_bytes(
                module.module_bytes.clone(),
                carry.render_for(step),
                ResourceLimits::default(),
                executor,
                depth,
                self.config.max_recursion_depth,
                PathBuf::from("."),
                cancel.clone(),
            )
            .await
            .map_err(|e| EngineError::ExecutionFailed(e.to_string()))?;

        let text = value
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string());
        Ok((text, value))
    }

    pub async fn create_artifact(&self, artifact: Artifact) -> Result<(), EngineError> {
        self.job_store.create_artifact(&artifact).await?;
        Ok(())
    }
}

/// A cheaply clonable handle to the pieces of `Engine` that recursion
/// needs, so the recursive path doesn't need an `Arc<Engine>` cycle
/// through `StepExecutor`.
#[derive(Clone)]
struct EngineHandle {
    job_store: Arc<dyn JobStore>,
    primitive_store: Arc<dyn PrimitiveStore>,
    wasm_runtime: Arc<WasmRuntime>,
    hub: Arc<Hub>,
    http_client: reqwest::Client,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl EngineHandle {
    fn as_engine(&self) -> Engine {
        Engine {
            job_store: self.job_store.clone(),
            primitive_store: self.primitive_store.clone(),
            wasm_runtime: self.wasm_runtime.clone(),
            hub: self.hub.clone(),
            http_client: self.http_client.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            started: AtomicBool::new(true),
            loop_handle: std::sync::Mutex::new(None),
        }
    }
}

/// Bridges the synchronous `RecursiveExecutor` callback from the WASM
/// host ABI back into async engine code (spec §4.3 "recursive execution").
struct StepExecutor {
    primitive_store: Arc<dyn PrimitiveStore>,
    http_client: reqwest::Client,
    handle: tokio::runtime::Handle,
    engine_handle: EngineHandle,
    depth: u32,
    max_depth: u32,
}

impl RecursiveExecutor for StepExecutor {
    fn execute_target(&self, kind: &str, name: &str, params: Value) -> Result<Value, String> {
        let handle = self.handle.clone();
        match kind {
            "agent" => {
                let store = self.primitive_store.clone();
                let runner_store = store.clone();
                let http_client = self.http_client.clone();
                let name = name.to_string();
                handle.block_on(async move {
                    let agent = runner_store.get_agent_by_name(&name).await.map_err(|e| e.to_string())?;
                    let tools = Arc::new(crate::tools::ToolRegistry::new(store, http_client.clone()));
                    let runner = AgentRunner::new(runner_store, tools, http_client, 8);
                    let prompt = params
                        .get("prompt")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| params.to_string());
                    let output = runner
                        .run(&agent, vec![ChatMessage::user(prompt)])
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(Value::String(output.text))
                })
            }
            "workflow" => {
                let engine = self.engine_handle.as_engine();
                let name = name.to_string();
                let depth = self.depth + 1;
                let max_depth = self.max_depth;
                if depth > max_depth {
                    return Err("recursion_limit".to_string());
                }
                handle.block_on(async move {
                    let workflow = engine
                        .primitive_store
                        .get_workflow_by_name(&name)
                        .await
                        .map_err(|e| e.to_string())?;
                    engine
                        .execute_now_recursive(workflow.id, params, depth)
                        .await
                        .map_err(|e| e.to_string())
                })
            }
            other => Err(format!("unknown execute_target kind: {other}")),
        }
    }
}

/// Accumulated inter-step state threaded through a single job/workflow
/// run (spec §4.5's "carry").
#[derive(Debug, Clone, Default)]
struct Carry {
    prompt: String,
    context: Option<Value>,
    instructions: Option<Value>,
    code: Option<Value>,
    review_target: Option<Value>,
    fields: Map<String, Value>,
}

impl Carry {
    fn seeded(job_input: &Value) -> Self {
        let prompt = job_input
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| job_input.to_string());
        Self {
            prompt,
            ..Default::default()
        }
    }

    fn apply_mapping(&mut self, mapping: crate::model::InputMapping, previous_output: &str) {
        use crate::model::InputMapping::*;
        match mapping {
            UseAsPrompt => self.prompt = previous_output.to_string(),
            AppendToPrompt => self.prompt = format!("{}\n{}", self.prompt, previous_output),
            UseAsContext => self.context = Some(Value::String(previous_output.to_string())),
            UseAsInstructions => self.instructions = Some(Value::String(previous_output.to_string())),
            UseAsCodeInput => self.code = Some(Value::String(previous_output.to_string())),
            UseAsReviewTarget => self.review_target = Some(Value::String(previous_output.to_string())),
        }
    }

    fn render_prompt(&self) -> String {
        let mut rendered = self.prompt.clone();
        if let Some(ctx) = &self.context {
            rendered.push_str(&format!("\n\n[context]\n{ctx}"));
        }
        if let Some(instr) = &self.instructions {
            rendered.push_str(&format!("\n\n[instructions]\n{instr}"));
        }
        if let Some(code) = &self.code {
            rendered.push_str(&format!("\n\n[code]\n{code}"));
        }
        if let Some(target) = &self.review_target {
            rendered.push_str(&format!("\n\n[review_target]\n{target}"));
        }
        rendered
    }

    fn render_for(&self, step: &WorkflowStep) -> Value {
        match step.step_type {
            StepType::Agent => Value::String(self.render_prompt()),
            StepType::Wasm => serde_json::json!({
                "prompt": self.prompt,
                "context": self.context,
                "instructions": self.instructions,
                "code": self.code,
                "reviewTarget": self.review_target,
                "config": step.config,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputMapping, OutputField};

    #[test]
    fn carry_seeds_prompt_from_job_input() {
        let carry = Carry::seeded(&serde_json::json!({ "prompt": "summarize this" }));
        assert_eq!(carry.prompt, "summarize this");
    }

    #[test]
    fn use_as_prompt_replaces_prompt_text() {
        let mut carry = Carry::seeded(&serde_json::json!({ "prompt": "first" }));
        carry.apply_mapping(InputMapping::UseAsPrompt, "second");
        assert_eq!(carry.prompt, "second");
    }

    #[test]
    fn append_to_prompt_concatenates_with_newline() {
        let mut carry = Carry::seeded(&serde_json::json!({ "prompt": "first" }));
        carry.apply_mapping(InputMapping::AppendToPrompt, "second");
        assert_eq!(carry.prompt, "first\nsecond");
    }

    #[test]
    fn use_as_context_leaves_prompt_untouched() {
        let mut carry = Carry::seeded(&serde_json::json!({ "prompt": "first" }));
        carry.apply_mapping(InputMapping::UseAsContext, "ctx");
        assert_eq!(carry.prompt, "first");
        assert_eq!(carry.context, Some(Value::String("ctx".to_string())));
    }

    #[test]
    fn output_field_carry_key_matches_closed_set() {
        assert_eq!(OutputField::Summary.carry_key(), "summary");
    }
}
