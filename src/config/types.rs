/// Core types and structures shared across judgebox
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric (uid, gid) pair used for file ownership and process identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId {
    pub uid: u32,
    pub gid: u32,
}

impl OwnerId {
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// nobody:nogroup, the identity untrusted checkers run as
    pub const fn nobody() -> Self {
        Self::new(65534, 65534)
    }

    /// Owner of staged artifacts; must differ from the checker's identity,
    /// or the checker could `chmod` its inputs writable
    pub const fn staging() -> Self {
        Self::new(65533, 65533)
    }

    /// Effective identity of the running process
    pub fn current() -> Self {
        Self::new(
            nix::unistd::geteuid().as_raw(),
            nix::unistd::getegid().as_raw(),
        )
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0 || self.gid == 0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// Resource limits applied to a process group and its processes.
///
/// `real_time_limit_ms` is enforced on the whole group; the remaining limits
/// are applied to each process before it starts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    /// CPU time limit (user + system) in milliseconds
    pub cpu_time_limit_ms: Option<u64>,
    /// Wall clock limit in milliseconds
    pub real_time_limit_ms: Option<u64>,
    /// Address space / peak memory limit in bytes
    pub memory_limit_bytes: Option<u64>,
    /// Largest file the process may write, in bytes
    pub output_limit_bytes: Option<u64>,
    /// Maximum number of processes for the owning user
    pub process_limit: Option<u32>,
}

impl ResourceLimits {
    /// Limits used for checker runs when none are configured
    pub fn checker_defaults() -> Self {
        Self {
            cpu_time_limit_ms: Some(10_000),
            real_time_limit_ms: Some(20_000),
            memory_limit_bytes: Some(256 * 1024 * 1024),
            output_limit_bytes: Some(16 * 1024 * 1024),
            process_limit: None,
        }
    }

    /// Limits used for compilation when none are configured.
    /// Toolchains fan out helper processes and need a wider window than runs.
    pub fn build_defaults() -> Self {
        Self {
            cpu_time_limit_ms: Some(30_000),
            real_time_limit_ms: Some(45_000),
            memory_limit_bytes: Some(1024 * 1024 * 1024),
            output_limit_bytes: Some(64 * 1024 * 1024),
            process_limit: None,
        }
    }
}

/// Final correctness judgment for one test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "WRONG_ANSWER")]
    WrongAnswer,
    #[serde(rename = "PRESENTATION_ERROR")]
    PresentationError,
    /// No trustworthy judgment could be made
    #[serde(rename = "FAILED")]
    Failed,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Ok => write!(f, "OK"),
            Verdict::WrongAnswer => write!(f, "WRONG_ANSWER"),
            Verdict::PresentationError => write!(f, "PRESENTATION_ERROR"),
            Verdict::Failed => write!(f, "FAILED"),
        }
    }
}

/// Outcome of one checker invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub verdict: Verdict,
    /// Which branch of the decision table produced the verdict
    pub cause: crate::verdict::VerdictCause,
    /// Human-readable summary (checker comment or sandbox failure)
    pub message: Option<String>,
    /// Combined checker stdout/stderr, bounded
    pub log: Option<String>,
}

/// Outcome of building a solution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    /// Build tool output; never empty on failure
    pub output: String,
}

impl BuildResult {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            success: false,
            output: if output.trim().is_empty() {
                "build failed without diagnostic output".to_string()
            } else {
                output
            },
        }
    }
}

/// Custom error types for judgebox
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Isolation error: {0}")]
    Isolation(String),

    #[error("Process error: {0}")]
    Process(String),
}

impl JudgeError {
    /// Infrastructure failures may succeed on retry; caller bugs never will
    pub fn is_retryable(&self) -> bool {
        match self {
            JudgeError::Io(_)
            | JudgeError::Staging(_)
            | JudgeError::Isolation(_)
            | JudgeError::Process(_) => true,
            JudgeError::Config(_) | JudgeError::ContractViolation(_) => false,
        }
    }
}

impl From<nix::errno::Errno> for JudgeError {
    fn from(err: nix::errno::Errno) -> Self {
        JudgeError::Process(err.to_string())
    }
}

/// Result type alias for judgebox operations
pub type Result<T> = std::result::Result<T, JudgeError>;
