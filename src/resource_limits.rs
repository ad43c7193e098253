/// Resource limit management using rlimit system calls
///
/// The plan is computed from the config in the parent, so the child only
/// issues `setrlimit` calls between fork and exec.
use crate::types::JudgerConfig;
use nix::sys::resource::{setrlimit, Resource};

/// One limit to install, soft and hard set to the same value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rlimit {
    pub resource: Resource,
    pub value: u64,
}

/// Ordered set of limits for one run: stack, address space, CPU, processes,
/// file size
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RlimitPlan {
    limits: Vec<Rlimit>,
}

impl RlimitPlan {
    pub fn from_config(config: &JudgerConfig) -> Self {
        let mut limits = Vec::with_capacity(5);

        if config.max_stack >= 1 {
            limits.push(Rlimit {
                resource: Resource::RLIMIT_STACK,
                value: config.max_stack as u64,
            });
        }

        // Address space gets twice the budget: the real check is post-hoc on
        // peak RSS, this only stops runaway allocation
        if !config.memory_limit_check_only {
            if let Some(memory) = config.memory_limit() {
                limits.push(Rlimit {
                    resource: Resource::RLIMIT_AS,
                    value: memory.saturating_mul(2),
                });
            }
        }

        if let Some(cpu_ms) = config.cpu_time_limit() {
            limits.push(Rlimit {
                resource: Resource::RLIMIT_CPU,
                value: cpu_seconds(cpu_ms),
            });
        }

        if let Some(processes) = config.process_limit() {
            limits.push(Rlimit {
                resource: Resource::RLIMIT_NPROC,
                value: processes,
            });
        }

        if let Some(output) = config.output_limit() {
            limits.push(Rlimit {
                resource: Resource::RLIMIT_FSIZE,
                value: output,
            });
        }

        Self { limits }
    }

    pub fn limits(&self) -> &[Rlimit] {
        &self.limits
    }

    /// Install every limit in order, stopping at the first failure
    pub fn apply(&self) -> nix::Result<()> {
        for limit in &self.limits {
            setrlimit(limit.resource, limit.value, limit.value)?;
        }
        Ok(())
    }
}

/// Whole seconds for RLIMIT_CPU, always strictly above the millisecond budget
pub fn cpu_seconds(cpu_ms: u64) -> u64 {
    (cpu_ms + 1000) / 1000
}
