//! Host ABI error code space (spec §4.3/§7): `0x00000000` is success,
//! `0xFFFFFFF0..=0xFFFFFFF8` are host-defined errors with stable meanings.

/// Guest calls succeeded.
pub const CODE_SUCCESS: u32 = 0x0000_0000;

/// Reading a guest-supplied pointer/length out of linear memory failed
/// (out of bounds, or the memory export is missing).
pub const CODE_MEMORY_READ_FAILED: u32 = 0xFFFF_FFF0;

/// Reading the git worktree's base path failed.
pub const CODE_BASE_PATH_READ_FAILED: u32 = 0xFFFF_FFF1;

/// Resolving the current working directory failed.
pub const CODE_CWD_FAILED: u32 = 0xFFFF_FFF2;

/// The target directory is not a git repository.
pub const CODE_NOT_A_GIT_REPO: u32 = 0xFFFF_FFF3;

/// `git worktree add` failed.
pub const CODE_WORKTREE_CREATE_FAILED: u32 = 0xFFFF_FFF4;

/// The guest-supplied output buffer was too small for
/// `get_last_operation_result`.
pub const CODE_BUFFER_TOO_SMALL: u32 = 0xFFFF_FFF5;

/// Writing the result back into guest linear memory failed.
pub const CODE_MEMORY_WRITE_FAILED: u32 = 0xFFFF_FFF6;

/// `execute_target` recursion depth exceeded the configured cap.
pub const CODE_RECURSION_LIMIT: u32 = 0xFFFF_FFF7;

/// A host-function call violated a sandbox policy (bad URL scheme, path
/// traversal, disallowed op).
pub const CODE_SANDBOX_VIOLATION: u32 = 0xFFFF_FFF8;

/// Named host error codes, for logging and test assertions. The numeric
/// values above are what actually crosses the ABI boundary; this enum is a
/// convenience label layered on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorCode {
    MemoryReadFailed,
    BasePathReadFailed,
    CwdFailed,
    NotAGitRepo,
    WorktreeCreateFailed,
    BufferTooSmall,
    MemoryWriteFailed,
    RecursionLimit,
    SandboxViolation,
}

impl HostErrorCode {
    pub fn code(self) -> u32 {
        match self {
            HostErrorCode::MemoryReadFailed => CODE_MEMORY_READ_FAILED,
            HostErrorCode::BasePathReadFailed => CODE_BASE_PATH_READ_FAILED,
            HostErrorCode::CwdFailed => CODE_CWD_FAILED,
            HostErrorCode::NotAGitRepo => CODE_NOT_A_GIT_REPO,
            HostErrorCode::WorktreeCreateFailed => CODE_WORKTREE_CREATE_FAILED,
            HostErrorCode::BufferTooSmall => CODE_BUFFER_TOO_SMALL,
            HostErrorCode::MemoryWriteFailed => CODE_MEMORY_WRITE_FAILED,
            HostErrorCode::RecursionLimit => CODE_RECURSION_LIMIT,
            HostErrorCode::SandboxViolation => CODE_SANDBOX_VIOLATION,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HostErrorCode::MemoryReadFailed => "memory_read_failed",
            HostErrorCode::BasePathReadFailed => "base_path_read_failed",
            HostErrorCode::CwdFailed => "cwd_failed",
            HostErrorCode::NotAGitRepo => "not_a_git_repo",
            HostErrorCode::WorktreeCreateFailed => "worktree_create_failed",
            HostErrorCode::BufferTooSmall => "buffer_too_small",
            HostErrorCode::MemoryWriteFailed => "memory_write_failed",
            HostErrorCode::RecursionLimit => "recursion_limit",
            HostErrorCode::SandboxViolation => "sandbox_violation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_host_error_code_is_distinct() {
        let codes = [
            HostErrorCode::MemoryReadFailed.code(),
            HostErrorCode::BasePathReadFailed.code(),
            HostErrorCode::CwdFailed.code(),
            HostErrorCode::NotAGitRepo.code(),
            HostErrorCode::WorktreeCreateFailed.code(),
            HostErrorCode::BufferTooSmall.code(),
            HostErrorCode::MemoryWriteFailed.code(),
            HostErrorCode::RecursionLimit.code(),
            HostErrorCode::SandboxViolation.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for (j, b) in codes.iter().enumerate() {
                assert!(i == j || a != b, "codes at {i} and {j} collide: {a:#x}");
            }
        }
    }

    #[test]
    fn success_is_zero() {
        assert_eq!(CODE_SUCCESS, 0);
    }
}
