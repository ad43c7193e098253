/// Child-side setup between fork and exec
///
/// Everything the child needs is prepared in the parent by
/// `ChildContext::prepare`: C strings, pointer vectors, rlimit values and
/// compiled seccomp programs. After fork the child only issues syscalls, in
/// this order:
///
/// 1. rlimits (stack, address space, CPU, processes, file size)
/// 2. stdin, stdout, stderr redirection
/// 3. setgid + setgroups, then setuid
/// 4. seccomp filter installation
/// 5. execve
///
/// Each stage short-circuits to the failure path, which reports through the
/// setup pipe, raises `SIGUSR1` and exits with status 1.
use crate::io_handler::{path_cstring, Redirections};
use crate::ipc::{SetupPipe, SetupReport};
use crate::resource_limits::RlimitPlan;
use crate::seccomp::CompiledPolicy;
use crate::types::{ErrorCode, JudgerConfig, JudgerError, Result};
use nix::errno::Errno;
use nix::sys::signal::{raise, Signal};
use nix::unistd::{Gid, Uid};
use std::convert::Infallible;
use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;

/// Signal the child raises on itself when setup fails
pub const SETUP_FAILURE_SIGNAL: Signal = Signal::SIGUSR1;

enum PolicyState {
    Disabled,
    Ready(CompiledPolicy),
    /// Unknown name or compile error, surfaces in the child as LOAD_SECCOMP_FAILED
    Failed,
}

/// Fully resolved child setup for one run
pub struct ChildContext {
    limits: RlimitPlan,
    redirections: Redirections,
    gid: Option<Gid>,
    uid: Option<Uid>,
    policy: PolicyState,
    exe: CString,
    // Owners of the strings the pointer vectors below point into
    _args: Vec<CString>,
    _env: Vec<CString>,
    argv: Vec<*const c_char>,
    envp: Vec<*const c_char>,
}

impl ChildContext {
    pub fn prepare(config: &JudgerConfig) -> Result<Self> {
        let exe = path_cstring(&config.exe_path)?;
        let args = to_cstrings(&config.args, "argument")?;
        let env = to_cstrings(&config.env, "environment entry")?;
        let argv = null_terminated(&args);
        let envp = null_terminated(&env);

        let policy = match config.seccomp_rule_name.as_deref() {
            None => PolicyState::Disabled,
            Some(name) => match CompiledPolicy::compile(name, &exe) {
                Ok(compiled) => PolicyState::Ready(compiled),
                Err(e) => {
                    log::warn!("Seccomp policy unavailable: {}", e);
                    PolicyState::Failed
                }
            },
        };

        Ok(Self {
            limits: RlimitPlan::from_config(config),
            redirections: Redirections::from_config(config)?,
            gid: config.gid.map(Gid::from_raw),
            uid: config.uid.map(Uid::from_raw),
            policy,
            exe,
            _args: args,
            _env: env,
            argv,
            envp,
        })
    }

    /// Run the setup pipeline and exec. Only returns through process exit.
    pub fn enter(&self, pipe: &mut SetupPipe) -> ! {
        pipe.close_read();

        let report = match self.setup() {
            Ok(never) => match never {},
            Err(report) => report,
        };

        pipe.report(report);
        let _ = raise(SETUP_FAILURE_SIGNAL);
        unsafe { libc::_exit(1) }
    }

    fn setup(&self) -> std::result::Result<Infallible, SetupReport> {
        self.limits
            .apply()
            .map_err(|e| SetupReport::new(ErrorCode::SetrlimitFailed, e))?;

        self.redirections
            .apply()
            .map_err(|e| SetupReport::new(ErrorCode::Dup2Failed, e))?;

        self.drop_privileges()
            .map_err(|e| SetupReport::new(ErrorCode::SetuidFailed, e))?;

        match &self.policy {
            PolicyState::Disabled => {}
            PolicyState::Ready(compiled) => {
                compiled
                    .install()
                    .map_err(|_| SetupReport::new(ErrorCode::LoadSeccompFailed, Errno::last()))?;
            }
            PolicyState::Failed => {
                return Err(SetupReport::new(ErrorCode::LoadSeccompFailed, Errno::EINVAL));
            }
        }

        unsafe {
            libc::execve(self.exe.as_ptr(), self.argv.as_ptr(), self.envp.as_ptr());
        }
        Err(SetupReport::new(ErrorCode::ExecveFailed, Errno::last()))
    }

    fn drop_privileges(&self) -> nix::Result<()> {
        if let Some(gid) = self.gid {
            nix::unistd::setgid(gid)?;
            nix::unistd::setgroups(&[gid])?;
        }
        if let Some(uid) = self.uid {
            nix::unistd::setuid(uid)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn argc(&self) -> usize {
        self.argv.len() - 1
    }

    #[cfg(test)]
    fn envc(&self) -> usize {
        self.envp.len() - 1
    }

    #[cfg(test)]
    fn has_policy(&self) -> bool {
        !matches!(self.policy, PolicyState::Disabled)
    }
}

fn to_cstrings(values: &[String], what: &str) -> Result<Vec<CString>> {
    values
        .iter()
        .map(|value| {
            CString::new(value.as_bytes()).map_err(|_| {
                JudgerError::InvalidConfig(format!("{} contains a NUL byte: {:?}", what, value))
            })
        })
        .collect()
}

fn null_terminated(values: &[CString]) -> Vec<*const c_char> {
    values
        .iter()
        .map(|value| value.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}
