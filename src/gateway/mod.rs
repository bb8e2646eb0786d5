//! Request Dispatcher (C6) + the public HTTP/WebSocket surface, grounded
//! on `orchestrator::api::OrchestratorApi`'s router-builder style.

pub mod dispatch;
pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::ApiError;
use crate::hub::Hub;
use crate::llm::ChatMessage;
use crate::model::{Job, JobStep};
use crate::store::{JobStore, PrimitiveStore};

use dispatch::{
    AsyncJobResponse, ChatCompletionRequest, ChatCompletionResponse, ChatCompletionUsage,
    ModelListEntry, ModelSelector,
};
use middleware::RequestTimeout;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub primitive_store: Arc<dyn PrimitiveStore>,
    pub job_store: Arc<dyn JobStore>,
    pub hub: Arc<Hub>,
    pub request_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    let timeout = state.request_timeout;
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/jobs/{id}", get(get_job))
        .route("/api/v1/jobs/{id}/steps", get(list_job_steps))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn_with_state(
            RequestTimeout(timeout),
            middleware::timeout_and_recover,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    req.validate()?;
    let selector = ModelSelector::parse(&req.model)?;

    let messages: Vec<ChatMessage> = req
        .messages
        .iter()
        .map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
            tool_call_id: None,
            name: None,
        })
        .collect();

    match selector {
        ModelSelector::Agent(name) => {
            let output = state
                .engine
                .run_agent(&name, messages)
                .await
                .map_err(|e| ApiError::request_error_internal(e))?;
            let usage = ChatCompletionUsage {
                prompt_tokens: output.usage.prompt_tokens.unwrap_or(0),
                completion_tokens: output.usage.completion_tokens.unwrap_or(0),
                total_tokens: output.usage.prompt_tokens.unwrap_or(0)
                    + output.usage.completion_tokens.unwrap_or(0),
            };
            Ok(Json(ChatCompletionResponse::single_message(&req.model, output.text, usage)).into_response())
        }
        ModelSelector::Workflow(name) => {
            let input = workflow_input_from_messages(&req.messages);
            let output = state
                .engine
                .execute_now_by_name(&name, input)
                .await
                .map_err(|e| ApiError::request_error_internal(e))?;
            let rendered = output
                .get("generatedText")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| output.to_string());
            Ok(Json(ChatCompletionResponse::single_message(
                &req.model,
                rendered,
                ChatCompletionUsage::default(),
            ))
            .into_response())
        }
        ModelSelector::AsyncWorkflow(name) => {
            let input = workflow_input_from_messages(&req.messages);
            let job = state
                .engine
                .submit_by_name(&name, input)
                .await
                .map_err(|e| ApiError::request_error_internal(e))?;
            Ok(Json(AsyncJobResponse {
                object: "async.job",
                job_id: job.id,
                status: "queued",
                message: format!("workflow '{name}' started"),
            })
            .into_response())
        }
    }
}

fn workflow_input_from_messages(messages: &[dispatch::ChatMessageWire]) -> serde_json::Value {
    let prompt = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();
    serde_json::json!({ "prompt": prompt })
}

async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<ModelListEntry>>, ApiError> {
    let agents = state
        .primitive_store
        .list_agents()
        .await
        .map_err(ApiError::internal)?;
    let workflows = state
        .primitive_store
        .list_workflows()
        .await
        .map_err(ApiError::internal)?;

    let mut models: Vec<ModelListEntry> = agents
        .into_iter()
        .map(|a| ModelListEntry {
            id: format!("agent/{}", a.name),
            object: "model",
            owned_by: "kintsugi",
        })
        .collect();
    models.extend(workflows.into_iter().map(|w| ModelListEntry {
        id: format!("workflow/{}", w.name),
        object: "model",
        owned_by: "kintsugi",
    }));
    Ok(Json(models))
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state.job_store.list_jobs().await.map_err(ApiError::internal)?;
    Ok(Json(jobs))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Job>, ApiError> {
    let job = state
        .job_store
        .get_job(id)
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    Ok(Json(job))
}

async fn list_job_steps(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<JobStep>>, ApiError> {
    let steps = state
        .job_store
        .list_steps(id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(steps))
}

async fn health(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.job_store.ping().await.map_err(ApiError::internal)?;
    Ok("ok")
}

const PING_INTERVAL: Duration = Duration::from_secs(54);
const PONG_TIMEOUT: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<Hub>) {
    let mut sub = hub.subscribe();
    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    let mut last_pong = tokio::time::Instant::now();

    loop {
        if last_pong.elapsed() > PONG_TIMEOUT {
            break;
        }

        tokio::select! {
            event = sub.recv() => {
                let Some(event) = event else { break };
                let Ok(payload) = serde_json::to_string(&event) else { continue };
                let send = socket.send(Message::Text(payload.into()));
                if tokio::time::timeout(WRITE_TIMEOUT, send).await.is_err() {
                    break;
                }
            }
            _ = ping_timer.tick() => {
                let ping = socket.send(Message::Ping(Vec::new().into()));
                if tokio::time::timeout(WRITE_TIMEOUT, ping).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Pong(_))) => last_pong = tokio::time::Instant::now(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::engine::{Engine, EngineConfig};
    use crate::store::memory::{MemoryJobStore, MemoryPrimitiveStore};
    use crate::wasm::WasmRuntime;

    fn test_state() -> AppState {
        let job_store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let primitive_store: Arc<dyn PrimitiveStore> = Arc::new(MemoryPrimitiveStore::new());
        let hub = Arc::new(Hub::new(16));
        let wasm_runtime = Arc::new(WasmRuntime::new().unwrap());
        let engine = Arc::new(Engine::new(
            job_store.clone(),
            primitive_store.clone(),
            wasm_runtime,
            hub.clone(),
            reqwest::Client::new(),
            EngineConfig {
                poll_interval: Duration::from_millis(50),
                timeout_workflow: Duration::from_secs(5),
                timeout_step: Duration::from_secs(5),
                max_recursion_depth: 8,
                max_tool_iterations: 8,
            },
        ));
        AppState {
            engine,
            primitive_store,
            job_store,
            hub,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn health_reports_ok_when_store_is_reachable() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_models_is_empty_with_no_seeded_primitives() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_completions_rejects_unknown_model_prefix() {
        let app = router(test_state());
        let body = serde_json::json!({
            "model": "invalid-model",
            "messages": [{"role": "user", "content": "hi"}],
        });
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
