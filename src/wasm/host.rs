//! Host ABI implementation: `HostState` plus the six linked host functions
//! from spec §4.3, adapted from the teacher's `ChannelHostState` shape
//! (per-execution state, workspace path guarding, rate-limited side
//! effects) onto this system's ABI instead of the channel-emit ABI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use wasmtime::{Caller, Linker, Memory};

use super::abi::{self, HostErrorCode};

/// Resource caps for one WASM execution (spec §4.3).
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub memory_bytes: usize,
    pub fuel: u64,
    pub timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024,
            fuel: 5_000_000_000,
            timeout: Duration::from_secs(60),
        }
    }
}

/// What `execute_target` recurses into. Implemented by the workflow
/// engine; kept as a trait object here so `wasm` never depends on
/// `engine` (the engine depends on `wasm`, not the reverse).
///
/// Host functions are synchronous wasmtime callbacks; the engine's
/// implementation is expected to bridge back into async code via
/// `tokio::runtime::Handle::block_on`, which is sound here because WASM
/// executions always run inside `spawn_blocking`.
pub trait RecursiveExecutor: Send + Sync {
    fn execute_target(&self, kind: &str, name: &str, params: Value) -> Result<Value, String>;
}

/// An `ExecuteTarget` that always fails; used where recursion is
/// deliberately unsupported (e.g. tool-local WASM invocations).
pub struct NoRecursion;

impl RecursiveExecutor for NoRecursion {
    fn execute_target(&self, _kind: &str, _name: &str, _params: Value) -> Result<Value, String> {
        Err("recursion is not available in this execution context".to_string())
    }
}

/// Per-execution host state. A fresh instance backs every module
/// invocation — nothing here is reused across executions.
pub struct HostState {
    pub(super) wasi: wasmtime_wasi::preview1::WasiP1Ctx,

    executor: Arc<dyn RecursiveExecutor>,
    http_client: reqwest::Client,
    http_handle: tokio::runtime::Handle,

    depth: u32,
    max_depth: u32,

    cwd: PathBuf,
    worktree_base: PathBuf,

    last_operation_result: Vec<u8>,
    last_operation_status: u32,
}

const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

impl HostState {
    pub fn new(
        executor: Arc<dyn RecursiveExecutor>,
        http_client: reqwest::Client,
        http_handle: tokio::runtime::Handle,
        depth: u32,
        max_depth: u32,
        cwd: PathBuf,
        stdin: Vec<u8>,
        stdout: wasmtime_wasi::pipe::MemoryOutputPipe,
        stderr: wasmtime_wasi::pipe::MemoryOutputPipe,
    ) -> Self {
        let wasi = wasmtime_wasi::WasiCtxBuilder::new()
            .stdin(wasmtime_wasi::pipe::MemoryInputPipe::new(stdin))
            .stdout(stdout)
            .stderr(stderr)
            .build_p1();
        Self {
            wasi,
            worktree_base: cwd.clone(),
            executor,
            http_client,
            http_handle,
            depth,
            max_depth,
            cwd,
            last_operation_result: Vec::new(),
            last_operation_status: abi::CODE_SUCCESS,
        }
    }

    fn set_last(&mut self, status: u32, result: Vec<u8>) {
        self.last_operation_status = status;
        self.last_operation_result = result;
    }

    fn set_error(&mut self, code: HostErrorCode) -> u32 {
        self.set_last(code.code(), code.name().as_bytes().to_vec());
        code.code()
    }
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> Option<Memory> {
    caller.get_export("memory")?.into_memory()
}

fn read_guest_bytes(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> Option<Vec<u8>> {
    let memory = guest_memory(caller)?;
    let data = memory.data(caller);
    let start = ptr as usize;
    let end = start.checked_add(len as usize)?;
    data.get(start..end).map(|s| s.to_vec())
}

fn read_guest_string(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> Option<String> {
    read_guest_bytes(caller, ptr, len).and_then(|b| String::from_utf8(b).ok())
}

/// Register the six host ABI functions on `linker` under the `env`
/// module, matching the guest-side import convention described in
/// spec.md §6.
pub fn link_host_functions(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "execute_target",
        |mut caller: Caller<'_, HostState>,
         type_ptr: u32,
         type_len: u32,
         id_ptr: u32,
         id_len: u32,
         params_ptr: u32,
         params_len: u32|
         -> u32 {
            let Some(kind) = read_guest_string(&mut caller, type_ptr, type_len) else {
                return caller.data_mut().set_error(HostErrorCode::MemoryReadFailed);
            };
            let Some(id) = read_guest_string(&mut caller, id_ptr, id_len) else {
                return caller.data_mut().set_error(HostErrorCode::MemoryReadFailed);
            };
            let Some(params_raw) = read_guest_bytes(&mut caller, params_ptr, params_len) else {
                return caller.data_mut().set_error(HostErrorCode::MemoryReadFailed);
            };
            let params: Value = match serde_json::from_slice(&params_raw) {
                Ok(v) => v,
                Err(_) => return caller.data_mut().set_error(HostErrorCode::MemoryReadFailed),
            };

            if kind != "workflow" && kind != "agent" {
                return caller.data_mut().set_error(HostErrorCode::SandboxViolation);
            }

            let state = caller.data_mut();
            if state.depth >= state.max_depth {
                return state.set_error(HostErrorCode::RecursionLimit);
            }

            let result = state.executor.execute_target(&kind, &id, params);
            match result {
                Ok(value) => {
                    let bytes = serde_json::to_vec(&value).unwrap_or_default();
                    state.set_last(abi::CODE_SUCCESS, bytes);
                    abi::CODE_SUCCESS
                }
                Err(_) => state.set_error(HostErrorCode::SandboxViolation),
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "http_request_with_headers",
        |mut caller: Caller<'_, HostState>,
         method_ptr: u32,
         method_len: u32,
         url_ptr: u32,
         url_len: u32,
         body_ptr: u32,
         body_len: u32,
         headers_ptr: u32,
         headers_len: u32|
         -> u32 {
            let Some(method) = read_guest_string(&mut caller, method_ptr, method_len) else {
                return caller.data_mut().set_error(HostErrorCode::MemoryReadFailed);
            };
            let Some(url) = read_guest_string(&mut caller, url_ptr, url_len) else {
                return caller.data_mut().set_error(HostErrorCode::MemoryReadFailed);
            };
            let body = read_guest_bytes(&mut caller, body_ptr, body_len).unwrap_or_default();
            let headers_raw =
                read_guest_string(&mut caller, headers_ptr, headers_len).unwrap_or_default();

            let Ok(parsed_url) = reqwest::Url::parse(&url) else {
                return caller.data_mut().set_error(HostErrorCode::SandboxViolation);
            };
            if !ALLOWED_SCHEMES.contains(&parsed_url.scheme()) {
                return caller.data_mut().set_error(HostErrorCode::SandboxViolation);
            }

            let headers: Vec<(String, String)> =
                serde_json::from_str(&headers_raw).unwrap_or_default();

            let state = caller.data_mut();
            let method = method.to_uppercase();
            let client = state.http_client.clone();
            let handle = state.http_handle.clone();

            let outcome = handle.block_on(async move {
                let mut req = client.request(
                    method.parse().unwrap_or(reqwest::Method::GET),
                    parsed_url,
                );
                for (k, v) in headers {
                    req = req.header(k, v);
                }
                if !body.is_empty() {
                    req = req.body(body);
                }
                let resp = req.send().await?;
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                Ok::<_, reqwest::Error>((status, text))
            });

            match outcome {
                Ok((status, text)) => {
                    let payload = serde_json::json!({ "status": status, "body": text });
                    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
                    state.set_last(abi::CODE_SUCCESS, bytes);
                    abi::CODE_SUCCESS
                }
                Err(_) => state.set_error(HostErrorCode::SandboxViolation),
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "create_git_worktree",
        |mut caller: Caller<'_, HostState>, name_ptr: u32, name_len: u32, base_ptr: u32, base_len: u32| -> u32 {
            let Some(name) = read_guest_string(&mut caller, name_ptr, name_len) else {
                return caller.data_mut().set_error(HostErrorCode::MemoryReadFailed);
            };
            let base = if base_len == 0 {
                None
            } else {
                match read_guest_string(&mut caller, base_ptr, base_len) {
                    Some(b) => Some(b),
                    None => return caller.data_mut().set_error(HostErrorCode::BasePathReadFailed),
                }
            };

            let state = caller.data_mut();
            let repo_root = base.map(PathBuf::from).unwrap_or_else(|| state.worktree_base.clone());
            let handle = state.http_handle.clone();

            let is_repo = handle.block_on(async {
                tokio::process::Command::new("git")
                    .arg("-C")
                    .arg(&repo_root)
                    .args(["rev-parse", "--is-inside-work-tree"])
                    .output()
                    .await
                    .map(|o| o.status.success())
                    .unwrap_or(false)
            });
            if !is_repo {
                return state.set_error(HostErrorCode::NotAGitRepo);
            }

            let worktree_path = repo_root.join(".worktrees").join(&name);
            let output = handle.block_on(async {
                tokio::process::Command::new("git")
                    .arg("-C")
                    .arg(&repo_root)
                    .arg("worktree")
                    .arg("add")
                    .arg("--force")
                    .arg(&worktree_path)
                    .output()
                    .await
            });

            match output {
                Ok(out) if out.status.success() => {
                    state.cwd = worktree_path.clone();
                    let bytes = worktree_path.to_string_lossy().into_owned().into_bytes();
                    state.set_last(abi::CODE_SUCCESS, bytes);
                    abi::CODE_SUCCESS
                }
                _ => state.set_error(HostErrorCode::WorktreeCreateFailed),
            }
        },
    )?;

    linker.func_wrap(
        "env",
        "set_working_directory",
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> u32 {
            let Some(path) = read_guest_string(&mut caller, ptr, len) else {
                return caller.data_mut().set_error(HostErrorCode::MemoryReadFailed);
            };
            let state = caller.data_mut();
            let resolved = state.cwd.join(path);
            state.cwd = resolved.clone();
            state.set_last(abi::CODE_SUCCESS, resolved.to_string_lossy().into_owned().into_bytes());
            abi::CODE_SUCCESS
        },
    )?;

    linker.func_wrap(
        "env",
        "get_last_operation_result",
        |mut caller: Caller<'_, HostState>, buf_ptr: u32, buf_len: u32| -> u32 {
            let needed = caller.data().last_operation_result.len() as u32;
            if buf_len == 0 {
                return needed;
            }
            let Some(memory) = guest_memory(&mut caller) else {
                return abi::CODE_MEMORY_READ_FAILED;
            };
            let result = caller.data().last_operation_result.clone();
            let to_write = result.len().min(buf_len as usize);
            if memory
                .write(&mut caller, buf_ptr as usize, &result[..to_write])
                .is_err()
            {
                return abi::CODE_MEMORY_WRITE_FAILED;
            }
            to_write as u32
        },
    )?;

    linker.func_wrap(
        "env",
        "get_last_operation_status",
        |caller: Caller<'_, HostState>| -> u32 { caller.data().last_operation_status },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExecutor;
    impl RecursiveExecutor for EchoExecutor {
        fn execute_target(&self, kind: &str, name: &str, params: Value) -> Result<Value, String> {
            Ok(serde_json::json!({ "kind": kind, "name": name, "params": params }))
        }
    }

    fn test_state(depth: u32, max_depth: u32, handle: tokio::runtime::Handle) -> HostState {
        HostState::new(
            Arc::new(EchoExecutor),
            reqwest::Client::new(),
            handle,
            depth,
            max_depth,
            PathBuf::from("/tmp"),
            Vec::new(),
            wasmtime_wasi::pipe::MemoryOutputPipe::new(64 * 1024),
            wasmtime_wasi::pipe::MemoryOutputPipe::new(64 * 1024),
        )
    }

    #[tokio::test]
    async fn host_state_starts_with_success_status_and_empty_result() {
        let state = test_state(0, 8, tokio::runtime::Handle::current());
        assert_eq!(state.last_operation_status, abi::CODE_SUCCESS);
        assert!(state.last_operation_result.is_empty());
    }

    #[tokio::test]
    async fn recursion_limit_is_detected_at_max_depth() {
        let mut state = test_state(8, 8, tokio::runtime::Handle::current());
        assert!(state.depth >= state.max_depth);
        let code = state.set_error(HostErrorCode::RecursionLimit);
        assert_eq!(code, abi::CODE_RECURSION_LIMIT);
    }
}
