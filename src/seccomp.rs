/// Syscall filtering for the judged process
///
/// Policies are looked up by name and compiled to BPF in the parent, before
/// fork. The child only installs the ready programs right before `execve`.
///
/// Two policies exist:
/// - `c_cpp`: whitelist for compiled submissions, everything else kills
/// - `general`: allow by default, deny process creation, signal sending,
///   foreign `execve` and writable `open`; sockets fail with `EACCES`
///
/// Both pin `execve` to the exact pointer of the resolved executable path,
/// which is the pointer the judger itself passes to `execve`.
use crate::types::{JudgerError, Result};
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};
use std::collections::BTreeMap;
use std::ffi::CStr;
use std::fmt;

type RuleMap = BTreeMap<i64, Vec<SeccompRule>>;

/// Open flags that grant write access
const WRITE_FLAGS: u64 = (libc::O_WRONLY | libc::O_RDWR) as u64;

/// A named set of seccomp filters
pub trait SyscallPolicy {
    fn name(&self) -> &'static str;

    /// Build the filters for an executable whose path lives at `exe_ptr`.
    /// Filters are installed in order; the kernel applies the strictest
    /// verdict across all of them.
    fn filters(&self, exe_ptr: u64, arch: TargetArch) -> Result<Vec<SeccompFilter>>;
}

/// Whitelist policy for C and C++ submissions
pub struct CCppPolicy;

impl SyscallPolicy for CCppPolicy {
    fn name(&self) -> &'static str {
        "c_cpp"
    }

    fn filters(&self, exe_ptr: u64, arch: TargetArch) -> Result<Vec<SeccompFilter>> {
        let mut allowed: Vec<i64> = vec![
            libc::SYS_read,
            libc::SYS_fstat,
            libc::SYS_mmap,
            libc::SYS_mprotect,
            libc::SYS_munmap,
            libc::SYS_uname,
            libc::SYS_brk,
            libc::SYS_exit_group,
            libc::SYS_close,
            libc::SYS_sysinfo,
            libc::SYS_write,
            libc::SYS_writev,
            libc::SYS_lseek,
        ];
        #[cfg(target_arch = "x86_64")]
        allowed.extend([libc::SYS_arch_prctl, libc::SYS_access, libc::SYS_readlink]);

        let mut rules: RuleMap = allowed.into_iter().map(|nr| (nr, vec![])).collect();

        rules.insert(
            libc::SYS_execve,
            vec![rule(vec![condition(0, SeccompCmpArgLen::Qword, SeccompCmpOp::Eq, exe_ptr)?])?],
        );

        // Read-only opens only
        #[cfg(target_arch = "x86_64")]
        rules.insert(libc::SYS_open, vec![read_only_open(1)?]);
        rules.insert(libc::SYS_openat, vec![read_only_open(2)?]);

        let filter = SeccompFilter::new(
            rules,
            SeccompAction::KillProcess,
            SeccompAction::Allow,
            arch,
        )
        .map_err(|e| JudgerError::Seccomp(format!("c_cpp filter: {}", e)))?;

        Ok(vec![filter])
    }
}

/// Permissive policy for interpreted and managed languages
pub struct GeneralPolicy;

impl SyscallPolicy for GeneralPolicy {
    fn name(&self) -> &'static str {
        "general"
    }

    fn filters(&self, exe_ptr: u64, arch: TargetArch) -> Result<Vec<SeccompFilter>> {
        let mut denied: Vec<i64> = vec![libc::SYS_clone, libc::SYS_kill, libc::SYS_execveat];
        #[cfg(target_arch = "x86_64")]
        denied.extend([libc::SYS_fork, libc::SYS_vfork]);

        let mut rules: RuleMap = denied.into_iter().map(|nr| (nr, vec![])).collect();

        rules.insert(
            libc::SYS_execve,
            vec![rule(vec![condition(0, SeccompCmpArgLen::Qword, SeccompCmpOp::Ne, exe_ptr)?])?],
        );

        #[cfg(target_arch = "x86_64")]
        rules.insert(libc::SYS_open, writable_open(1)?);
        rules.insert(libc::SYS_openat, writable_open(2)?);

        let kill = SeccompFilter::new(
            rules,
            SeccompAction::Allow,
            SeccompAction::KillProcess,
            arch,
        )
        .map_err(|e| JudgerError::Seccomp(format!("general filter: {}", e)))?;

        let mut socket_rules = RuleMap::new();
        socket_rules.insert(libc::SYS_socket, vec![]);
        let deny_socket = SeccompFilter::new(
            socket_rules,
            SeccompAction::Allow,
            SeccompAction::Errno(libc::EACCES as u32),
            arch,
        )
        .map_err(|e| JudgerError::Seccomp(format!("general socket filter: {}", e)))?;

        Ok(vec![kill, deny_socket])
    }
}

/// Find a policy by its configured name
pub fn lookup(name: &str) -> Option<Box<dyn SyscallPolicy>> {
    match name {
        "c_cpp" => Some(Box::new(CCppPolicy)),
        "general" => Some(Box::new(GeneralPolicy)),
        _ => None,
    }
}

/// BPF programs ready to be installed in the child
pub struct CompiledPolicy {
    name: &'static str,
    programs: Vec<BpfProgram>,
}

impl CompiledPolicy {
    /// Look up `name` and compile it against `exe`, whose pointer must be the
    /// one later handed to `execve`
    pub fn compile(name: &str, exe: &CStr) -> Result<Self> {
        let policy = lookup(name)
            .ok_or_else(|| JudgerError::Seccomp(format!("unknown seccomp rule: {}", name)))?;

        let arch: TargetArch = std::env::consts::ARCH
            .try_into()
            .map_err(|e: seccompiler::BackendError| {
                JudgerError::Seccomp(format!("unsupported architecture: {}", e))
            })?;

        let programs = policy
            .filters(exe.as_ptr() as u64, arch)?
            .into_iter()
            .map(|filter| {
                BpfProgram::try_from(filter).map_err(|e| {
                    JudgerError::Seccomp(format!("BPF compilation failed: {}", e))
                })
            })
            .collect::<Result<Vec<BpfProgram>>>()?;

        log::debug!(
            "Compiled seccomp policy {} into {} program(s)",
            policy.name(),
            programs.len()
        );

        Ok(Self {
            name: policy.name(),
            programs,
        })
    }

    #[cfg(test)]
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    #[cfg(test)]
    pub(crate) fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Install every program in the calling process. Also sets
    /// `no_new_privs`. Irreversible.
    pub fn install(&self) -> std::result::Result<(), seccompiler::Error> {
        for program in &self.programs {
            seccompiler::apply_filter(program)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CompiledPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPolicy")
            .field("name", &self.name)
            .field("programs", &self.programs.len())
            .finish()
    }
}

fn condition(
    arg: u8,
    len: SeccompCmpArgLen,
    op: SeccompCmpOp,
    value: u64,
) -> Result<SeccompCondition> {
    SeccompCondition::new(arg, len, op, value)
        .map_err(|e| JudgerError::Seccomp(format!("invalid condition on arg {}: {}", arg, e)))
}

fn rule(conditions: Vec<SeccompCondition>) -> Result<SeccompRule> {
    SeccompRule::new(conditions).map_err(|e| JudgerError::Seccomp(format!("invalid rule: {}", e)))
}

/// Matches when the flags argument grants no write access
fn read_only_open(flags_arg: u8) -> Result<SeccompRule> {
    rule(vec![condition(
        flags_arg,
        SeccompCmpArgLen::Dword,
        SeccompCmpOp::MaskedEq(WRITE_FLAGS),
        0,
    )?])
}

/// Matches when the flags argument contains `O_WRONLY` or `O_RDWR`
fn writable_open(flags_arg: u8) -> Result<Vec<SeccompRule>> {
    [libc::O_WRONLY, libc::O_RDWR]
        .into_iter()
        .map(|flag| {
            let flag = flag as u64;
            rule(vec![condition(
                flags_arg,
                SeccompCmpArgLen::Dword,
                SeccompCmpOp::MaskedEq(flag),
                flag,
            )?])
        })
        .collect()
}
