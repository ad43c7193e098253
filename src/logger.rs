/// Judger log destination
///
/// One append-only file per run, written with a level, a local timestamp and
/// the source location of the call. Records are mirrored to the `log` facade
/// so `RUST_LOG` diagnostics see them too. A sink that failed to open is a
/// no-op; write errors are dropped.
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::panic::Location;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Fatal,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Fatal => "FATAL",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

pub struct LogSink {
    file: Option<File>,
}

impl LogSink {
    /// Open `path` for appending, degrading to a no-op sink on failure
    pub fn open(path: &Path) -> Self {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Self { file: Some(file) },
            Err(e) => {
                log::warn!("Cannot open judger log {}: {}", path.display(), e);
                Self { file: None }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.file.is_some()
    }

    #[track_caller]
    pub fn fatal(&self, args: fmt::Arguments<'_>) {
        self.write(LogLevel::Fatal, Location::caller(), args);
    }

    #[track_caller]
    pub fn warning(&self, args: fmt::Arguments<'_>) {
        self.write(LogLevel::Warning, Location::caller(), args);
    }

    #[track_caller]
    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.write(LogLevel::Info, Location::caller(), args);
    }

    #[track_caller]
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.write(LogLevel::Debug, Location::caller(), args);
    }

    fn write(&self, level: LogLevel, location: &Location<'_>, args: fmt::Arguments<'_>) {
        match level {
            LogLevel::Fatal => log::error!("{}", args),
            LogLevel::Warning => log::warn!("{}", args),
            LogLevel::Info => log::info!("{}", args),
            LogLevel::Debug => log::debug!("{}", args),
        }

        // Debug records only reach the file in debug builds
        if level == LogLevel::Debug && !cfg!(debug_assertions) {
            return;
        }

        if let Some(mut file) = self.file.as_ref() {
            let line = format_record(level, location, args);
            let _ = file.write_all(line.as_bytes());
        }
    }

    /// Flush and release the file
    pub fn close(mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
    }
}

fn format_record(level: LogLevel, location: &Location<'_>, args: fmt::Arguments<'_>) -> String {
    format!(
        "{} [{}] [{}:{}]{}\n",
        level.as_str(),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        location.file(),
        location.line(),
        args
    )
}
