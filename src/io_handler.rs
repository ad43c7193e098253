/// Standard stream redirection for the judged process
use crate::types::{JudgerConfig, JudgerError, Result};
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

/// Where stderr goes
#[derive(Clone, Debug, PartialEq, Eq)]
enum ErrorTarget {
    /// Same path as stdout: share the already opened descriptor
    Output,
    File(CString),
}

/// Redirection paths resolved in the parent, applied in the child
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Redirections {
    input: Option<CString>,
    output: Option<CString>,
    error: Option<ErrorTarget>,
}

/// Descriptors opened by `Redirections::apply`. Fixed slots, no allocation.
#[derive(Default)]
struct OpenedStreams {
    input: Option<RawFd>,
    output: Option<RawFd>,
    error: Option<RawFd>,
}

impl OpenedStreams {
    /// Close every stream once. An aliased stderr never owns a descriptor.
    fn close(&mut self) {
        for fd in [self.input.take(), self.output.take(), self.error.take()]
            .into_iter()
            .flatten()
        {
            if fd > libc::STDERR_FILENO {
                let _ = nix::unistd::close(fd);
            }
        }
    }
}

impl Redirections {
    pub fn from_config(config: &JudgerConfig) -> Result<Self> {
        let input = config.input_path.as_deref().map(path_cstring).transpose()?;
        let output = config.output_path.as_deref().map(path_cstring).transpose()?;

        let error = match config.error_path.as_deref() {
            None => None,
            Some(path) if output.is_some() && config.output_path.as_deref() == Some(path) => {
                Some(ErrorTarget::Output)
            }
            Some(path) => Some(ErrorTarget::File(path_cstring(path)?)),
        };

        Ok(Self {
            input,
            output,
            error,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.input.is_none() && self.output.is_none() && self.error.is_none()
    }

    /// Whether stderr reuses the stdout stream
    #[cfg(test)]
    pub(crate) fn error_aliases_output(&self) -> bool {
        self.error == Some(ErrorTarget::Output)
    }

    /// Open each configured path and move it onto fd 0, 1 or 2.
    ///
    /// Runs in the child between fork and exec. The opened descriptors are
    /// released whether or not every step succeeds.
    pub fn apply(&self) -> nix::Result<()> {
        let mut opened = OpenedStreams::default();
        let result = self.redirect(&mut opened);
        opened.close();
        result
    }

    fn redirect(&self, opened: &mut OpenedStreams) -> nix::Result<()> {
        if let Some(path) = &self.input {
            let fd = open(path.as_c_str(), OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())?;
            opened.input = Some(fd);
            nix::unistd::dup2(fd, libc::STDIN_FILENO)?;
        }

        if let Some(path) = &self.output {
            let fd = open_for_write(path)?;
            opened.output = Some(fd);
            nix::unistd::dup2(fd, libc::STDOUT_FILENO)?;
        }

        match &self.error {
            None => {}
            Some(ErrorTarget::Output) => {
                if let Some(fd) = opened.output {
                    nix::unistd::dup2(fd, libc::STDERR_FILENO)?;
                }
            }
            Some(ErrorTarget::File(path)) => {
                let fd = open_for_write(path)?;
                opened.error = Some(fd);
                nix::unistd::dup2(fd, libc::STDERR_FILENO)?;
            }
        }

        Ok(())
    }
}

fn open_for_write(path: &CString) -> nix::Result<RawFd> {
    open(
        path.as_c_str(),
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC | OFlag::O_CLOEXEC,
        Mode::from_bits_truncate(0o666),
    )
}

/// Convert a path for use after fork, rejecting interior NUL bytes
pub fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        JudgerError::InvalidConfig(format!("path contains a NUL byte: {}", path.display()))
    })
}
