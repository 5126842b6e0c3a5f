//! Log and progress sinks threaded through the public operations.
//!
//! There is no process-wide logger: every operation that wants to emit a
//! record receives a sink from its caller.

/// Severity of a log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Receives `(source, level, message)` log records.
pub type LogSink<'a> = dyn FnMut(&str, LogLevel, &str) + 'a;

/// A single progress step: what is running, and how far along it is.
#[derive(Clone, Copy, Debug)]
pub struct ProgressUpdate<'a> {
    pub action: &'a str,
    pub current: u64,
    pub total: u64,
}

impl ProgressUpdate<'_> {
    /// Completed fraction in `[0, 1]`; stage-transition updates with no
    /// object count report 0 until done.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f64 / self.total as f64
        }
    }
}

pub type ProgressSink<'a> = dyn FnMut(&ProgressUpdate<'_>) + 'a;

/// Sink that drops every record; used where a caller did not install one.
pub fn null_log() -> impl FnMut(&str, LogLevel, &str) {
    |_, _, _| {}
}

pub fn null_progress() -> impl FnMut(&ProgressUpdate<'_>) {
    |_| {}
}
