/// Process supervisor: one fork, one wait, one verdict
use crate::ipc::SetupPipe;
use crate::isolation::{ChildContext, SETUP_FAILURE_SIGNAL};
use crate::logger::LogSink;
use crate::timeout::{kill_pid, TimeoutKiller};
use crate::types::{JudgeResult, JudgerConfig, JudgerError, Result, Verdict};
use crate::verdict::{classify, Observation};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid, Uid};
use std::time::Instant;

/// Run `config.exe_path` once under the configured limits.
///
/// Never fails: engine errors are reported in `JudgeResult::error` and the
/// judger log. Requires root.
pub fn run(config: &JudgerConfig) -> JudgeResult {
    let logger = LogSink::open(&config.log_path);

    let result = match supervise(config, &logger) {
        Ok(result) => result,
        Err(e) => {
            log::debug!("Run aborted: {}", e);
            logger.fatal(format_args!("Error: {}", e.code().name()));
            JudgeResult {
                error: e.code(),
                ..JudgeResult::default()
            }
        }
    };

    logger.close();
    result
}

fn supervise(config: &JudgerConfig, logger: &LogSink) -> Result<JudgeResult> {
    if !Uid::current().is_root() {
        return Err(JudgerError::RootRequired);
    }

    config.validate()?;
    let context = ChildContext::prepare(config)?;
    let mut pipe = SetupPipe::new()?;

    let start = Instant::now();

    // The child only makes syscalls until execve; every allocation it needs
    // happened in ChildContext::prepare
    let child = match unsafe { fork() }.map_err(JudgerError::Fork)? {
        ForkResult::Child => context.enter(&mut pipe),
        ForkResult::Parent { child } => child,
    };
    pipe.close_write();
    logger.debug(format_args!("Started {} as pid {}", config.exe_path.display(), child));

    let killer = match config.real_time_limit() {
        Some(budget) => match TimeoutKiller::spawn(child, budget) {
            Ok(killer) => Some(killer),
            Err(e) => {
                kill_and_reap(child);
                return Err(e);
            }
        },
        None => None,
    };

    let waited = wait_with_usage(child);
    let real_time = start.elapsed().as_millis() as u64;

    if let Some(killer) = killer {
        killer.cancel();
    }

    let (status, usage) = match waited {
        Ok(waited) => waited,
        Err(e) => {
            kill_and_reap(child);
            return Err(JudgerError::Wait(e));
        }
    };

    let mut result = JudgeResult {
        real_time,
        ..JudgeResult::default()
    };

    let exit_code = match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => {
            result.signal = signal as i32;
            0
        }
        _ => 0,
    };

    match pipe.read_report() {
        Ok(Some(report)) => {
            logger.fatal(format_args!(
                "Error: System errno: {}; Internal errno: {}",
                report.describe_errno(),
                report.code.name()
            ));
            result.error = report.code;
            result.result = Verdict::SystemError;
            return Ok(result);
        }
        Ok(None) => {}
        Err(e) => {
            logger.warning(format_args!("Cannot read setup report: {}", e));
            if result.signal == SETUP_FAILURE_SIGNAL as i32 {
                result.result = Verdict::SystemError;
                return Ok(result);
            }
        }
    }

    result.exit_code = exit_code;
    result.cpu_time = timeval_ms(&usage.ru_utime);
    result.memory = (usage.ru_maxrss.max(0) as u64).saturating_mul(1024);

    let observed = Observation {
        exit_code: result.exit_code,
        signal: result.signal,
        cpu_time: result.cpu_time,
        real_time: result.real_time,
        memory: result.memory,
    };
    result.result = classify(config, &observed);

    logger.debug(format_args!("Run finished: {:?}", result));
    Ok(result)
}

/// Block until `pid` terminates, returning its status and resource usage
fn wait_with_usage(pid: Pid) -> nix::Result<(WaitStatus, libc::rusage)> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain data, all-zero is a valid value
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

    loop {
        let ret = unsafe { libc::wait4(pid.as_raw(), &mut status, 0, &mut usage) };
        if ret != -1 {
            break;
        }
        match Errno::last() {
            Errno::EINTR => continue,
            e => return Err(e),
        }
    }

    Ok((WaitStatus::from_raw(pid, status)?, usage))
}

/// Kill the child and reap it so no zombie outlives the run
fn kill_and_reap(pid: Pid) {
    kill_pid(pid);
    if let Err(e) = waitpid(pid, None) {
        log::warn!("Failed to reap {}: {}", pid, e);
    }
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    let ms = tv.tv_sec as i64 * 1000 + tv.tv_usec as i64 / 1000;
    ms.max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCode;

    #[test]
    fn test_timeval_conversion() {
        let tv = libc::timeval {
            tv_sec: 2,
            tv_usec: 345_678,
        };
        assert_eq!(timeval_ms(&tv), 2345);
    }

    #[test]
    fn test_non_root_fails_before_fork() {
        if Uid::current().is_root() {
            println!("Skipping test - running as root");
            return;
        }

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = JudgerConfig::new("/bin/true");
        config.log_path = temp_dir.path().join("judger.log");

        let result = run(&config);
        assert_eq!(result.error, ErrorCode::RootRequired);
        assert_eq!(result.cpu_time, 0);
        assert_eq!(result.real_time, 0);
        assert_eq!(result.memory, 0);

        let log = std::fs::read_to_string(&config.log_path).unwrap();
        assert!(log.contains("Error: ROOT_REQUIRED"));
    }
}
