/// Core types and structures for the judger
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use thiserror::Error;

/// Raw sentinel accepted at the command line for "no limit"
pub const UNLIMITED: i64 = -1;

/// Upper bound on the argument vector (argv[0] included)
pub const MAX_ARGS: usize = 255;

/// Upper bound on the environment vector
pub const MAX_ENV: usize = 255;

/// Default stack limit (16 MiB)
pub const DEFAULT_MAX_STACK: i64 = 16 * 1024 * 1024;

/// Unprivileged identity the target runs as unless told otherwise
pub const DEFAULT_RUN_ID: u32 = 65534;

/// Configuration of one judged run.
///
/// Every optional limit uses `None` for "unlimited"; a bounded limit must be
/// at least 1. `max_stack` has no unlimited form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgerConfig {
    /// Max CPU time in milliseconds
    pub max_cpu_time: Option<i64>,
    /// Max wall clock time in milliseconds
    pub max_real_time: Option<i64>,
    /// Max virtual memory in bytes
    pub max_memory: Option<i64>,
    /// Max stack in bytes
    pub max_stack: i64,
    /// Max number of processes for the runtime user
    pub max_process_number: Option<i64>,
    /// Max bytes written to any file, stdout and stderr included
    pub max_output_size: Option<i64>,
    /// Only measure memory, do not install the address space limit
    pub memory_limit_check_only: bool,
    /// Executable to run
    pub exe_path: PathBuf,
    /// Redirect stdin from this file
    pub input_path: Option<PathBuf>,
    /// Redirect stdout to this file
    pub output_path: Option<PathBuf>,
    /// Redirect stderr to this file
    pub error_path: Option<PathBuf>,
    /// Full argument vector, argv[0] included
    pub args: Vec<String>,
    /// Environment as `KEY=value` entries
    pub env: Vec<String>,
    /// Judger log destination
    pub log_path: PathBuf,
    /// Named syscall policy, `None` disables filtering
    pub seccomp_rule_name: Option<String>,
    /// User ID to run as, `None` keeps the current identity
    pub uid: Option<u32>,
    /// Group ID to run as, `None` keeps the current identity
    pub gid: Option<u32>,
}

impl Default for JudgerConfig {
    fn default() -> Self {
        Self {
            max_cpu_time: None,
            max_real_time: None,
            max_memory: None,
            max_stack: DEFAULT_MAX_STACK,
            max_process_number: None,
            max_output_size: None,
            memory_limit_check_only: false,
            exe_path: PathBuf::new(),
            input_path: None,
            output_path: None,
            error_path: None,
            args: Vec::new(),
            env: Vec::new(),
            log_path: PathBuf::from("judger.log"),
            seccomp_rule_name: None,
            uid: Some(DEFAULT_RUN_ID),
            gid: Some(DEFAULT_RUN_ID),
        }
    }
}

impl JudgerConfig {
    /// Create a config for `exe_path` with `argv[0]` set to the path
    pub fn new(exe_path: impl Into<PathBuf>) -> Self {
        let exe_path = exe_path.into();
        Self {
            args: vec![exe_path.to_string_lossy().into_owned()],
            exe_path,
            ..Self::default()
        }
    }

    /// Replace the argument vector, rejecting more than `MAX_ARGS` entries
    pub fn with_args<I, S>(mut self, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.len() > MAX_ARGS {
            return Err(JudgerError::InvalidConfig(format!(
                "{} arguments given, at most {} allowed",
                args.len(),
                MAX_ARGS
            )));
        }
        self.args = args;
        Ok(self)
    }

    /// Replace the environment, rejecting more than `MAX_ENV` entries
    pub fn with_env<I, S>(mut self, env: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let env: Vec<String> = env.into_iter().map(Into::into).collect();
        if env.len() > MAX_ENV {
            return Err(JudgerError::InvalidConfig(format!(
                "{} environment entries given, at most {} allowed",
                env.len(),
                MAX_ENV
            )));
        }
        self.env = env;
        Ok(self)
    }

    /// Check every limit and bound before any process is created
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("max_cpu_time", self.max_cpu_time),
            ("max_real_time", self.max_real_time),
            ("max_memory", self.max_memory),
            ("max_process_number", self.max_process_number),
            ("max_output_size", self.max_output_size),
        ];
        for (name, limit) in limits {
            if let Some(value) = limit {
                if value < 1 {
                    return Err(JudgerError::InvalidConfig(format!(
                        "{} must be at least 1 or unlimited, got {}",
                        name, value
                    )));
                }
            }
        }

        if self.max_stack < 1 {
            return Err(JudgerError::InvalidConfig(format!(
                "max_stack must be at least 1, got {}",
                self.max_stack
            )));
        }

        if self.args.len() > MAX_ARGS {
            return Err(JudgerError::InvalidConfig(format!(
                "too many arguments: {}",
                self.args.len()
            )));
        }
        if self.env.len() > MAX_ENV {
            return Err(JudgerError::InvalidConfig(format!(
                "too many environment entries: {}",
                self.env.len()
            )));
        }

        if self.exe_path.as_os_str().is_empty() {
            return Err(JudgerError::InvalidConfig(
                "exe_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Memory limit in bytes, if bounded
    pub fn memory_limit(&self) -> Option<u64> {
        bounded(self.max_memory)
    }

    /// CPU time limit in milliseconds, if bounded
    pub fn cpu_time_limit(&self) -> Option<u64> {
        bounded(self.max_cpu_time)
    }

    /// Wall time limit in milliseconds, if bounded
    pub fn real_time_limit(&self) -> Option<u64> {
        bounded(self.max_real_time)
    }

    /// Process count limit, if bounded
    pub fn process_limit(&self) -> Option<u64> {
        bounded(self.max_process_number)
    }

    /// Output size limit in bytes, if bounded
    pub fn output_limit(&self) -> Option<u64> {
        bounded(self.max_output_size)
    }
}

fn bounded(limit: Option<i64>) -> Option<u64> {
    limit.filter(|v| *v >= 1).map(|v| v as u64)
}

/// Engine-level error codes reported in `JudgeResult::error`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "i32")]
pub enum ErrorCode {
    None = 0,
    InvalidConfig = -1,
    ForkFailed = -2,
    PthreadFailed = -3,
    WaitFailed = -4,
    RootRequired = -5,
    LoadSeccompFailed = -6,
    SetrlimitFailed = -7,
    Dup2Failed = -8,
    SetuidFailed = -9,
    ExecveFailed = -10,
    /// Reserved for the answer checker, never produced here
    SpjError = -11,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Name as written to the judger log
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::None => "SUCCESS",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::ForkFailed => "FORK_FAILED",
            ErrorCode::PthreadFailed => "PTHREAD_FAILED",
            ErrorCode::WaitFailed => "WAIT_FAILED",
            ErrorCode::RootRequired => "ROOT_REQUIRED",
            ErrorCode::LoadSeccompFailed => "LOAD_SECCOMP_FAILED",
            ErrorCode::SetrlimitFailed => "SETRLIMIT_FAILED",
            ErrorCode::Dup2Failed => "DUP2_FAILED",
            ErrorCode::SetuidFailed => "SETUID_FAILED",
            ErrorCode::ExecveFailed => "EXECVE_FAILED",
            ErrorCode::SpjError => "SPJ_ERROR",
        }
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(code: i32) -> std::result::Result<Self, Self::Error> {
        Ok(match code {
            0 => ErrorCode::None,
            -1 => ErrorCode::InvalidConfig,
            -2 => ErrorCode::ForkFailed,
            -3 => ErrorCode::PthreadFailed,
            -4 => ErrorCode::WaitFailed,
            -5 => ErrorCode::RootRequired,
            -6 => ErrorCode::LoadSeccompFailed,
            -7 => ErrorCode::SetrlimitFailed,
            -8 => ErrorCode::Dup2Failed,
            -9 => ErrorCode::SetuidFailed,
            -10 => ErrorCode::ExecveFailed,
            -11 => ErrorCode::SpjError,
            other => return Err(format!("unknown error code {}", other)),
        })
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

/// Judged outcome of one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "i32")]
pub enum Verdict {
    /// Reserved for the answer checker, never produced here
    WrongAnswer = -1,
    Success = 0,
    CpuTimeLimitExceeded = 1,
    RealTimeLimitExceeded = 2,
    MemoryLimitExceeded = 3,
    RuntimeError = 4,
    SystemError = 5,
}

impl Verdict {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for Verdict {
    type Error = String;

    fn try_from(code: i32) -> std::result::Result<Self, Self::Error> {
        Ok(match code {
            -1 => Verdict::WrongAnswer,
            0 => Verdict::Success,
            1 => Verdict::CpuTimeLimitExceeded,
            2 => Verdict::RealTimeLimitExceeded,
            3 => Verdict::MemoryLimitExceeded,
            4 => Verdict::RuntimeError,
            5 => Verdict::SystemError,
            other => return Err(format!("unknown verdict {}", other)),
        })
    }
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

/// Metrics and verdict of one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeResult {
    /// CPU time used, in milliseconds
    pub cpu_time: u64,
    /// Wall clock time used, in milliseconds
    pub real_time: u64,
    /// Peak resident memory, in bytes
    pub memory: u64,
    /// Signal that terminated the process, 0 if none
    pub signal: i32,
    /// Exit code of the process
    pub exit_code: i32,
    /// Engine-level error
    pub error: ErrorCode,
    /// Verdict
    pub result: Verdict,
}

impl Default for JudgeResult {
    fn default() -> Self {
        Self {
            cpu_time: 0,
            real_time: 0,
            memory: 0,
            signal: 0,
            exit_code: 0,
            error: ErrorCode::None,
            result: Verdict::Success,
        }
    }
}

/// Engine failures, each of which maps onto one `ErrorCode`
#[derive(Error, Debug)]
pub enum JudgerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("root privileges are required")]
    RootRequired,

    #[error("fork failed: {0}")]
    Fork(nix::Error),

    #[error("failed to create setup pipe: {0}")]
    Pipe(nix::Error),

    #[error("failed to start timeout killer: {0}")]
    Thread(std::io::Error),

    #[error("wait4 failed: {0}")]
    Wait(nix::Error),

    #[error("seccomp error: {0}")]
    Seccomp(String),
}

impl JudgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            JudgerError::InvalidConfig(_) => ErrorCode::InvalidConfig,
            JudgerError::RootRequired => ErrorCode::RootRequired,
            JudgerError::Fork(_) | JudgerError::Pipe(_) => ErrorCode::ForkFailed,
            JudgerError::Thread(_) => ErrorCode::PthreadFailed,
            JudgerError::Wait(_) => ErrorCode::WaitFailed,
            JudgerError::Seccomp(_) => ErrorCode::LoadSeccompFailed,
        }
    }
}

/// Result type alias for judger operations
pub type Result<T> = std::result::Result<T, JudgerError>;
