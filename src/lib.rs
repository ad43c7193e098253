//! judger: a single-shot process sandbox for online judges
//!
//! `runner::run` forks one child, confines it with rlimits, stream
//! redirection, an identity drop and an optional seccomp policy, execs the
//! target and classifies how it ended.

#[cfg(not(target_os = "linux"))]
compile_error!("judger only supports Linux");

pub mod cli;
pub mod io_handler;
pub mod ipc;
pub mod isolation;
pub mod logger;
pub mod resource_limits;
pub mod runner;
pub mod seccomp;
pub mod timeout;
pub mod types;
pub mod verdict;

pub use runner::run;
pub use types::{ErrorCode, JudgeResult, JudgerConfig, JudgerError, Verdict};
