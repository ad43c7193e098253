/// Verdict classification of a finished run
use crate::types::{JudgerConfig, Verdict};

/// What the supervisor observed about the child after it was reaped
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    pub exit_code: i32,
    pub signal: i32,
    pub cpu_time: u64,
    pub real_time: u64,
    pub memory: u64,
}

/// Map an observation to a verdict.
///
/// A segfault is final: memory limit exceeded if the peak was over the limit,
/// runtime error otherwise. For every other outcome the checks run in a fixed
/// order and a later match overwrites an earlier one, so exceeded limits win
/// over a plain runtime error.
pub fn classify(config: &JudgerConfig, observed: &Observation) -> Verdict {
    let memory_exceeded = config
        .memory_limit()
        .is_some_and(|limit| observed.memory > limit);

    if observed.signal == libc::SIGSEGV {
        return if memory_exceeded {
            Verdict::MemoryLimitExceeded
        } else {
            Verdict::RuntimeError
        };
    }

    let mut verdict = Verdict::Success;

    if observed.exit_code != 0 || observed.signal != 0 {
        verdict = Verdict::RuntimeError;
    }

    if memory_exceeded {
        verdict = Verdict::MemoryLimitExceeded;
    }

    if config
        .real_time_limit()
        .is_some_and(|limit| observed.real_time > limit)
    {
        verdict = Verdict::RealTimeLimitExceeded;
    }

    if config
        .cpu_time_limit()
        .is_some_and(|limit| observed.cpu_time > limit)
    {
        verdict = Verdict::CpuTimeLimitExceeded;
    }

    verdict
}
