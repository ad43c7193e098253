/// Child-to-parent setup failure channel
///
/// A close-on-exec pipe created before fork. A successful `execve` closes the
/// child's write end, so the parent reads EOF. A failed setup step writes one
/// fixed-size report instead.
use crate::types::{ErrorCode, JudgerError, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use std::os::unix::io::RawFd;

/// Encoded size of a `SetupReport`
pub const REPORT_LEN: usize = 8;

/// Which setup step failed and the errno it failed with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupReport {
    pub code: ErrorCode,
    pub errno: i32,
}

impl SetupReport {
    pub fn new(code: ErrorCode, errno: Errno) -> Self {
        Self {
            code,
            errno: errno as i32,
        }
    }

    pub fn encode(&self) -> [u8; REPORT_LEN] {
        let mut bytes = [0u8; REPORT_LEN];
        bytes[..4].copy_from_slice(&self.code.as_i32().to_le_bytes());
        bytes[4..].copy_from_slice(&self.errno.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; REPORT_LEN]) -> Option<Self> {
        let code = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let errno = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let code = ErrorCode::try_from(code).ok()?;
        Some(Self { code, errno })
    }

    /// OS description of the errno, as written to the judger log
    pub fn describe_errno(&self) -> &'static str {
        Errno::from_i32(self.errno).desc()
    }
}

/// Pipe carrying at most one `SetupReport`
pub struct SetupPipe {
    read_fd: Option<RawFd>,
    write_fd: Option<RawFd>,
}

impl SetupPipe {
    pub fn new() -> Result<Self> {
        let (read_fd, write_fd) =
            nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(JudgerError::Pipe)?;
        Ok(Self {
            read_fd: Some(read_fd),
            write_fd: Some(write_fd),
        })
    }

    /// Drop the read end (child side)
    pub fn close_read(&mut self) {
        if let Some(fd) = self.read_fd.take() {
            let _ = nix::unistd::close(fd);
        }
    }

    /// Drop the write end (parent side, right after fork)
    pub fn close_write(&mut self) {
        if let Some(fd) = self.write_fd.take() {
            let _ = nix::unistd::close(fd);
        }
    }

    /// Write a report from the child. Errors are ignored: the child is about
    /// to die and the parent falls back to the exit signal.
    pub fn report(&self, report: SetupReport) {
        let Some(fd) = self.write_fd else {
            return;
        };
        let bytes = report.encode();
        let mut written = 0;
        while written < REPORT_LEN {
            match nix::unistd::write(fd, &bytes[written..]) {
                Ok(0) => return,
                Ok(n) => written += n,
                Err(Errno::EINTR) => continue,
                Err(_) => return,
            }
        }
    }

    /// Read the child's report once it has exited.
    ///
    /// `Ok(None)` means the pipe closed without a report. A short report is
    /// treated as a read error.
    pub fn read_report(&mut self) -> nix::Result<Option<SetupReport>> {
        let Some(fd) = self.read_fd else {
            return Err(Errno::EBADF);
        };
        let mut bytes = [0u8; REPORT_LEN];
        let mut filled = 0;
        while filled < REPORT_LEN {
            match nix::unistd::read(fd, &mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
        match filled {
            0 => Ok(None),
            REPORT_LEN => SetupReport::decode(&bytes).map(Some).ok_or(Errno::EIO),
            _ => Err(Errno::EIO),
        }
    }
}

impl Drop for SetupPipe {
    fn drop(&mut self) {
        self.close_read();
        self.close_write();
    }
}
