/// Wall-clock enforcement for the judged process
///
/// A detached thread waits on a cancel channel for the rounded-up budget and
/// sends `SIGKILL` to the child if nobody cancelled it first. It shares no
/// state with the supervisor beyond the pid.
use crate::types::{JudgerError, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::thread;
use std::time::Duration;

/// Sleep length in whole seconds, rounded so it never undershoots the budget
pub fn killer_delay(budget_ms: u64) -> Duration {
    Duration::from_secs((budget_ms + 1000) / 1000)
}

/// Handle to a running timeout killer
pub struct TimeoutKiller {
    cancel: Sender<()>,
}

impl TimeoutKiller {
    /// Start the killer for `pid` with a wall-clock budget in milliseconds
    pub fn spawn(pid: Pid, budget_ms: u64) -> Result<Self> {
        let (cancel, cancelled) = bounded::<()>(1);
        let delay = killer_delay(budget_ms);

        // The JoinHandle is dropped: the thread is never joined
        thread::Builder::new()
            .name("timeout-killer".to_string())
            .spawn(move || match cancelled.recv_timeout(delay) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    log::debug!("Wall time budget of {}ms elapsed, killing {}", budget_ms, pid);
                    kill_pid(pid);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("Timeout killer lost its supervisor, killing {}", pid);
                    kill_pid(pid);
                }
            })
            .map_err(JudgerError::Thread)?;

        Ok(Self { cancel })
    }

    /// Stop the killer without sending a signal. Best effort: if the thread
    /// already fired this only logs.
    pub fn cancel(self) {
        if self.cancel.try_send(()).is_err() {
            log::warn!("Timeout killer already finished, cancel ignored");
        }
    }
}

/// SIGKILL `pid`, ignoring a process that is already gone
pub fn kill_pid(pid: Pid) {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to kill {}: {}", pid, e),
    }
}
