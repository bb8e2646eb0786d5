//! Engine configuration, assembled from CLI flags layered over environment
//! variables (loaded via `dotenvy`), matching the teacher's `cli::config`
//! flag-struct style.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Top-level CLI/environment configuration for `kintsugid`.
#[derive(Debug, Clone, Parser)]
#[command(name = "kintsugid", about = "Agent/workflow execution platform")]
pub struct Config {
    /// Postgres connection string for the job store and primitive store.
    #[arg(long, env = "KINTSUGI_DB")]
    pub db: String,

    /// HTTP bind address for the public gateway.
    #[arg(long, env = "KINTSUGI_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Poll interval for the engine's claim loop, in milliseconds.
    #[arg(long, env = "KINTSUGI_POLL_INTERVAL_MS", default_value_t = 200)]
    pub poll_interval_ms: u64,

    /// Default per-job timeout in seconds. Overridable per-request via the
    /// store-backed `timeout_workflow_seconds` setting.
    #[arg(long, env = "KINTSUGI_TIMEOUT_WORKFLOW_SECONDS", default_value_t = 300)]
    pub timeout_workflow_seconds: u64,

    /// Default per-step timeout in seconds.
    #[arg(long, env = "KINTSUGI_TIMEOUT_STEP_SECONDS", default_value_t = 60)]
    pub timeout_step_seconds: u64,

    /// Default per-HTTP-request timeout in seconds, used by the C8
    /// middleware. Overridable via the store-backed
    /// `timeout_request_seconds` setting.
    #[arg(long, env = "KINTSUGI_TIMEOUT_REQUEST_SECONDS", default_value_t = 30)]
    pub timeout_request_seconds: u64,

    /// Grace period for shutdown draining, in seconds.
    #[arg(long, env = "KINTSUGI_SHUTDOWN_GRACE_SECONDS", default_value_t = 15)]
    pub shutdown_grace_seconds: u64,

    /// Maximum recursion depth for WASM `execute_target` sub-workflow calls.
    #[arg(long, env = "KINTSUGI_MAX_RECURSION_DEPTH", default_value_t = 8)]
    pub max_recursion_depth: u32,

    /// Maximum tool-use iterations per agent step.
    #[arg(long, env = "KINTSUGI_MAX_TOOL_ITERATIONS", default_value_t = 8)]
    pub max_tool_iterations: u32,

    /// Update Hub per-subscriber buffer size.
    #[arg(long, env = "KINTSUGI_HUB_BUFFER", default_value_t = 256)]
    pub hub_buffer: usize,

    /// Job streamer poll cadence, in milliseconds.
    #[arg(long, env = "KINTSUGI_STREAM_POLL_MS", default_value_t = 2_000)]
    pub stream_poll_ms: u64,
}

impl Config {
    /// Parse from `std::env::args`, loading a `.env` file first if present.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Config::parse()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout_workflow(&self) -> Duration {
        Duration::from_secs(self.timeout_workflow_seconds)
    }

    pub fn timeout_step(&self) -> Duration {
        Duration::from_secs(self.timeout_step_seconds)
    }

    pub fn timeout_request(&self) -> Duration {
        Duration::from_secs(self.timeout_request_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_minimal_args() {
        let cfg = Config::parse_from(["kintsugid", "--db", "postgres://localhost/kintsugi"]);
        assert_eq!(cfg.timeout_workflow_seconds, 300);
        assert_eq!(cfg.max_recursion_depth, 8);
        assert_eq!(cfg.hub_buffer, 256);
    }

    #[test]
    fn overrides_take_effect() {
        let cfg = Config::parse_from([
            "kintsugid",
            "--db",
            "postgres://localhost/kintsugi",
            "--timeout-workflow-seconds",
            "90",
        ]);
        assert_eq!(cfg.timeout_workflow(), Duration::from_secs(90));
    }
}
