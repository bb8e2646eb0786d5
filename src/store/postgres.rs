//! Postgres-backed `Store`, implementing both [`super::JobStore`] and
//! [`super::PrimitiveStore`] against one `deadpool_postgres` pool, in the
//! direct-row-mapping style of `history/store.rs` (no ORM).

use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use serde_json::Value;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::model::{
    Agent, Artifact, Job, JobStatus, JobStep, Provider, Tool, WasmModule, Workflow, WorkflowStep,
};

use super::{JobStore, PrimitiveStore, Result, StoreError};

refinery::embed_migrations!("migrations");

/// Owns the connection pool for both the job queue and the primitive
/// directory, matching the teacher's single `Store` struct.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Build a pool from a `postgres://` connection string and run pending
    /// migrations. Mirrors `history::store::Store::new` + `run_migrations`.
    pub async fn connect(conn_str: &str) -> Result<Self> {
        let pg_config: tokio_postgres::Config = conn_str
            .parse()
            .map_err(|e: tokio_postgres::Error| StoreError::Backend(e))?;

        let mut cfg = PoolConfig::new();
        cfg.dbname = pg_config.get_dbname().map(str::to_string);
        cfg.host = pg_config
            .get_hosts()
            .first()
            .and_then(|h| match h {
                tokio_postgres::config::Host::Tcp(s) => Some(s.clone()),
                #[allow(unreachable_patterns)]
                _ => None,
            });
        cfg.port = pg_config.get_ports().first().copied();
        cfg.user = pg_config.get_user().map(str::to_string);
        cfg.password = pg_config
            .get_password()
            .map(|p| String::from_utf8_lossy(p).into_owned());

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        let store = Store { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut client = self.pool.get().await?;
        let client = &mut **client;
        migrations::runner()
            .run_async(client)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }
}

fn row_to_job(row: &Row) -> Result<Job> {
    let status: String = row.get("status");
    Ok(Job {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        status: status.parse()?,
        input_data: row.get("input_data"),
        output_data: row.get("output_data"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error: row.get("error"),
    })
}

fn row_to_job_step(row: &Row) -> Result<JobStep> {
    let status: String = row.get("status");
    Ok(JobStep {
        id: row.get("id"),
        job_id: row.get("job_id"),
        workflow_step_id: row.get("workflow_step_id"),
        status: status.parse()?,
        input_data: row.get("input_data"),
        output_data: row.get("output_data"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error: row.get("error"),
    })
}

fn row_to_artifact(row: &Row) -> Artifact {
    Artifact {
        id: row.get("id"),
        job_id: row.get("job_id"),
        name: row.get("name"),
        mime_type: row.get("mime_type"),
        data: row.get("data"),
    }
}

fn row_to_provider(row: &Row) -> Provider {
    Provider {
        id: row.get("id"),
        name: row.get("name"),
        base_url: row.get("base_url"),
        api_key: row.get("api_key"),
    }
}

fn row_to_agent(row: &Row) -> Agent {
    let tool_ids: Vec<Uuid> = row
        .try_get::<_, Vec<Uuid>>("tool_ids")
        .unwrap_or_default();
    Agent {
        id: row.get("id"),
        name: row.get("name"),
        provider_id: row.get("provider_id"),
        model_id: row.get("model_id"),
        system_prompt: row.get("system_prompt"),
        tool_ids,
    }
}

fn row_to_workflow(row: &Row) -> Workflow {
    Workflow {
        id: row.get("id"),
        name: row.get("name"),
        is_async: row.get("is_async"),
    }
}

fn row_to_workflow_step(row: &Row) -> Result<WorkflowStep> {
    let step_type: String = row.get("step_type");
    let input_mapping: String = row.get("input_mapping");
    let output_field: String = row.get("output_field");
    Ok(WorkflowStep {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        step_order: row.get("step_order"),
        step_type: step_type.parse()?,
        agent_id: row.get("agent_id"),
        wasm_module_id: row.get("wasm_module_id"),
        input_mapping: input_mapping.parse()?,
        output_field: output_field.parse()?,
        config: row.get("config"),
    })
}

fn row_to_tool(row: &Row) -> Result<Tool> {
    let tool_type: String = row.get("tool_type");
    Ok(Tool {
        id: row.get("id"),
        name: row.get("name"),
        tool_type: tool_type.parse()?,
        config: row.get("config"),
    })
}

fn row_to_wasm_module(row: &Row) -> WasmModule {
    WasmModule {
        id: row.get("id"),
        name: row.get("name"),
        module_bytes: row.get("module_bytes"),
    }
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{kind} {id} not found"))
}

#[async_trait]
impl JobStore for Store {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO jobs (id, workflow_id, status, input_data, output_data, created_at, started_at, completed_at, error)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &job.id,
                    &job.workflow_id,
                    &job.status.as_str(),
                    &job.input_data,
                    &job.output_data,
                    &job.created_at,
                    &job.started_at,
                    &job.completed_at,
                    &job.error,
                ],
            )
            .await?;
        Ok(())
    }

    async fn claim_next_queued(&self) -> Result<Option<Job>> {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;

        let row = txn
            .query_opt(
                "SELECT * FROM jobs WHERE status = 'queued'
                 ORDER BY created_at ASC
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1",
                &[],
            )
            .await?;

        let Some(row) = row else {
            txn.commit().await?;
            return Ok(None);
        };

        let id: Uuid = row.get("id");
        let updated = txn
            .query_one(
                "UPDATE jobs SET status = 'running', started_at = now()
                 WHERE id = $1
                 RETURNING *",
                &[&id],
            )
            .await?;

        txn.commit().await?;
        Ok(Some(row_to_job(&updated)?))
    }

    async fn mark_completed(&self, job_id: Uuid, output: Value) -> Result<()> {
        self.mark_terminal(job_id, "completed", Some(output), None)
            .await
    }

    async fn mark_failed(&self, job_id: Uuid, err: &str) -> Result<()> {
        self.mark_terminal(job_id, "failed", None, Some(err)).await
    }

    async fn mark_cancelled(&self, job_id: Uuid) -> Result<()> {
        self.mark_terminal(job_id, "cancelled", None, None).await
    }

    async fn append_step(&self, step: &JobStep) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO job_steps (id, job_id, workflow_step_id, status, input_data, output_data, started_at, completed_at, error)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &step.id,
                    &step.job_id,
                    &step.workflow_step_id,
                    &step.status.as_str(),
                    &step.input_data,
                    &step.output_data,
                    &step.started_at,
                    &step.completed_at,
                    &step.error,
                ],
            )
            .await?;
        Ok(())
    }

    async fn update_step(&self, step: &JobStep) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "UPDATE job_steps SET status = $2, output_data = $3, started_at = $4, completed_at = $5, error = $6
                 WHERE id = $1",
                &[
                    &step.id,
                    &step.status.as_str(),
                    &step.output_data,
                    &step.started_at,
                    &step.completed_at,
                    &step.error,
                ],
            )
            .await?;
        if affected == 0 {
            return Err(not_found("job_step", step.id));
        }
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Job> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM jobs WHERE id = $1", &[&id])
            .await?
            .ok_or_else(|| not_found("job", id))?;
        row_to_job(&row)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT * FROM jobs ORDER BY created_at DESC", &[])
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn list_steps(&self, job_id: Uuid) -> Result<Vec<JobStep>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT js.* FROM job_steps js
                 JOIN workflow_steps ws ON ws.id = js.workflow_step_id
                 WHERE js.job_id = $1
                 ORDER BY ws.step_order ASC, ws.id ASC",
                &[&job_id],
            )
            .await?;
        rows.iter().map(row_to_job_step).collect()
    }

    async fn create_artifact(&self, artifact: &Artifact) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO artifacts (id, job_id, name, mime_type, data) VALUES ($1, $2, $3, $4, $5)",
                &[
                    &artifact.id,
                    &artifact.job_id,
                    &artifact.name,
                    &artifact.mime_type,
                    &artifact.data,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT * FROM artifacts WHERE job_id = $1", &[&job_id])
            .await?;
        Ok(rows.iter().map(row_to_artifact).collect())
    }

    async fn requeue_stuck_running(&self) -> Result<Vec<Job>> {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;

        let stuck = txn
            .query("SELECT * FROM jobs WHERE status = 'running'", &[])
            .await?;

        txn.execute(
            "UPDATE job_steps SET status = 'failed', error = 'engine_restart', completed_at = now()
             WHERE status = 'running' AND job_id IN (SELECT id FROM jobs WHERE status = 'running')",
            &[],
        )
        .await?;

        let requeued = txn
            .query(
                "UPDATE jobs SET status = 'queued', started_at = NULL WHERE status = 'running' RETURNING *",
                &[],
            )
            .await?;

        txn.commit().await?;

        let _ = stuck;
        requeued.iter().map(row_to_job).collect()
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        Ok(())
    }
}

impl Store {
    async fn mark_terminal(
        &self,
        job_id: Uuid,
        status: &str,
        output: Option<Value>,
        err: Option<&str>,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        let current: String = client
            .query_opt("SELECT status FROM jobs WHERE id = $1", &[&job_id])
            .await?
            .ok_or_else(|| not_found("job", job_id))?
            .get("status");

        let current: JobStatus = current.parse()?;
        if current.is_terminal() {
            if current.as_str() == status {
                return Ok(());
            }
            return Err(StoreError::Conflict(format!(
                "job {job_id} already terminal as {current}"
            )));
        }

        client
            .execute(
                "UPDATE jobs SET status = $2, output_data = COALESCE($3, output_data), error = $4, completed_at = now()
                 WHERE id = $1",
                &[&job_id, &status, &output, &err],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PrimitiveStore for Store {
    async fn get_provider(&self, id: Uuid) -> Result<Provider> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM providers WHERE id = $1", &[&id])
            .await?
            .ok_or_else(|| not_found("provider", id))?;
        Ok(row_to_provider(&row))
    }

    async fn get_agent(&self, id: Uuid) -> Result<Agent> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(&agent_select_query("a.id = $1"), &[&id])
            .await?
            .ok_or_else(|| not_found("agent", id))?;
        Ok(row_to_agent(&row))
    }

    async fn get_agent_by_name(&self, name: &str) -> Result<Agent> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(&agent_select_query("lower(a.name) = lower($1)"), &[&name])
            .await?
            .ok_or_else(|| not_found("agent", name))?;
        Ok(row_to_agent(&row))
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let client = self.pool.get().await?;
        let rows = client.query(&agent_select_query("true"), &[]).await?;
        Ok(rows.iter().map(row_to_agent).collect())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Workflow> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM workflows WHERE id = $1", &[&id])
            .await?
            .ok_or_else(|| not_found("workflow", id))?;
        Ok(row_to_workflow(&row))
    }

    async fn get_workflow_by_name(&self, name: &str) -> Result<Workflow> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT * FROM workflows WHERE lower(name) = lower($1)",
                &[&name],
            )
            .await?
            .ok_or_else(|| not_found("workflow", name))?;
        Ok(row_to_workflow(&row))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT * FROM workflows", &[]).await?;
        Ok(rows.iter().map(row_to_workflow).collect())
    }

    async fn list_workflow_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM workflow_steps WHERE workflow_id = $1 ORDER BY step_order ASC, id ASC",
                &[&workflow_id],
            )
            .await?;
        rows.iter().map(row_to_workflow_step).collect()
    }

    async fn get_tool(&self, id: Uuid) -> Result<Tool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM tools WHERE id = $1", &[&id])
            .await?
            .ok_or_else(|| not_found("tool", id))?;
        row_to_tool(&row)
    }

    async fn list_tools_for_agent(&self, agent_id: Uuid) -> Result<Vec<Tool>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT t.* FROM tools t
                 JOIN agent_tools at ON at.tool_id = t.id
                 WHERE at.agent_id = $1",
                &[&agent_id],
            )
            .await?;
        rows.iter().map(row_to_tool).collect()
    }

    async fn get_wasm_module(&self, id: Uuid) -> Result<WasmModule> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM wasm_modules WHERE id = $1", &[&id])
            .await?
            .ok_or_else(|| not_found("wasm_module", id))?;
        Ok(row_to_wasm_module(&row))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT value FROM settings WHERE key = $1", &[&key])
            .await?;
        Ok(row.map(|r| r.get("value")))
    }
}

fn agent_select_query(predicate: &str) -> String {
    format!(
        "SELECT a.*, COALESCE(array_agg(at.tool_id) FILTER (WHERE at.tool_id IS NOT NULL), '{{}}') AS tool_ids
         FROM agents a
         LEFT JOIN agent_tools at ON at.agent_id = a.id
         WHERE {predicate}
         GROUP BY a.id"
    )
}
