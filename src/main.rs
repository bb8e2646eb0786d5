//! `kintsugid`: binary entry point. Loads configuration, wires the store,
//! engine, update hub and gateway together, then serves until a shutdown
//! signal arrives.

use std::sync::Arc;

use kintsugi::config::Config;
use kintsugi::engine::{Engine, EngineConfig};
use kintsugi::gateway::{self, AppState};
use kintsugi::hub::Hub;
use kintsugi::shutdown;
use kintsugi::store::postgres::Store;
use kintsugi::wasm::WasmRuntime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::load();

    let store = Arc::new(Store::connect(&config.db).await?);
    let wasm_runtime = Arc::new(WasmRuntime::new()?);
    let hub = Arc::new(Hub::new(config.hub_buffer));
    let http_client = reqwest::Client::new();

    let engine = Arc::new(Engine::new(
        store.clone(),
        store.clone(),
        wasm_runtime,
        hub.clone(),
        http_client,
        EngineConfig {
            poll_interval: config.poll_interval(),
            timeout_workflow: config.timeout_workflow(),
            timeout_step: config.timeout_step(),
            max_recursion_depth: config.max_recursion_depth,
            max_tool_iterations: config.max_tool_iterations,
        },
    ));
    engine.start().await?;
    hub.spawn_job_streamer(store.clone(), config.stream_poll_interval());

    let app_state = AppState {
        engine: engine.clone(),
        primitive_store: store.clone(),
        job_store: store,
        hub,
        request_timeout: config.timeout_request(),
    };
    let router = gateway::router(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!(addr = %config.listen, "kintsugid listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown::wait_for_shutdown_signal())
        .await?;

    shutdown::drain(engine, config.shutdown_grace()).await;
    Ok(())
}
