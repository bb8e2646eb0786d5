//! WASM Runtime (C3): sandboxed execution of workflow steps and the
//! host ABI guest modules call into.

pub mod abi;
pub mod host;
pub mod runtime;

pub use host::{NoRecursion, RecursiveExecutor, ResourceLimits};
pub use runtime::WasmRuntime;

/// Error taxonomy for the WASM boundary, converted to `internal_server_error`
/// at the HTTP edge (wasm failures are always the engine's problem to
/// explain, never the caller's to see in detail).
#[derive(Debug, thiserror::Error)]
pub enum WasmError {
    #[error("wasm engine error: {0}")]
    Engine(String),

    #[error("module failed to compile: {0}")]
    Compilation(String),

    #[error("module has no recognizable entry point (_start or main)")]
    NoEntryPoint,

    #[error("module trapped: {trap} (stderr: {stderr})")]
    ModuleFailed { trap: String, stderr: String },

    #[error("module produced invalid output JSON: {0}")]
    InvalidOutput(String),

    #[error("module execution trapped: {0}")]
    Trap(String),

    #[error("module execution exceeded its timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(String),
}
