use std::io::Write;

/// Where scanner errors and warnings are reported. The default sink writes to
/// stderr; tests and embedders can substitute their own to capture messages.
/// Fatality is decided by the scanner flags, not the sink: a fatal error is
/// also returned as `Err` to the calling frame.
pub trait ErrorSink {
    fn error(&self, message: &str, fatal: bool);
    fn warning(&self, message: &str);
}

/// Default sink: messages go to the process standard error stream.
pub struct StderrSink;

impl ErrorSink for StderrSink {
    fn error(&self, message: &str, _fatal: bool) {
        let _ = writeln!(std::io::stderr(), "{message}");
    }

    fn warning(&self, message: &str) {
        let _ = writeln!(std::io::stderr(), "{message}");
    }
}

/// A reported scan failure. The message already carries the file name and
/// line, in `file(line): error: ...` form. `fatal` is false only when the
/// originating scanner runs with `ScanFlags::NO_FATAL_ERRORS`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ScanError {
    pub message: String,
    pub fatal: bool,
}

impl ScanError {
    pub fn new(message: impl Into<String>, fatal: bool) -> Self {
        Self {
            message: message.into(),
            fatal,
        }
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
