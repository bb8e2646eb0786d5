//! Shutdown Coordinator (C9): waits for Ctrl-C or SIGTERM, then drains
//! the engine and hub before the process exits. Built in the teacher's
//! explicit-coordinator-struct manner (`sandbox::manager`'s
//! initialize/cleanup pairing), since the teacher has no literal SIGTERM
//! handler in the retrieved files to copy from.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;

/// Waits for either signal, whichever comes first.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

/// Drains the engine's in-flight work and the update hub, then returns.
/// Callers are expected to exit the process shortly after this returns
/// (or after `grace` elapses, whichever comes first).
pub async fn drain(engine: Arc<Engine>, grace: Duration) {
    let drain = async {
        engine.stop().await;
    };

    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!("shutdown grace period elapsed before the engine drained cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::hub::Hub;
    use crate::store::memory::{MemoryJobStore, MemoryPrimitiveStore};
    use crate::wasm::WasmRuntime;

    #[tokio::test]
    async fn drain_returns_once_engine_stops() {
        let job_store = Arc::new(MemoryJobStore::new());
        let primitive_store = Arc::new(MemoryPrimitiveStore::new());
        let hub = Arc::new(Hub::new(16));
        let wasm_runtime = Arc::new(WasmRuntime::new().unwrap());
        let engine = Arc::new(Engine::new(
            job_store,
            primitive_store,
            wasm_runtime,
            hub,
            reqwest::Client::new(),
            EngineConfig {
                poll_interval: Duration::from_millis(20),
                timeout_workflow: Duration::from_secs(5),
                timeout_step: Duration::from_secs(5),
                max_recursion_depth: 8,
                max_tool_iterations: 8,
            },
        ));
        engine.start().await.unwrap();

        drain(engine, Duration::from_secs(2)).await;
    }
}
