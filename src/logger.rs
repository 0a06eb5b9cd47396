//! Per-peer leveled logger.
//!
//! Each executor owns one logger stamped with its peer rank (rank 0 for the
//! non-distributed backends). The level is read from the `SCOOL_LOG`
//! environment variable at construction (`DEBUG`, `INFO`, `WARN`, `ERROR`
//! or `QUIET`, defaulting to `INFO`), so runs are tuned without code
//! changes.
//!
//! The default sink forwards to `tracing` events carrying the rank as a
//! field; install whatever subscriber the host application uses. The file
//! sink writes plain timestamped lines and validates the path eagerly:
//! construction fails with [`LoggerError`] rather than dropping records
//! later.

use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Environment variable selecting the log level.
pub const LEVEL_ENV: &str = "SCOOL_LOG";

/// Log severity; `Quiet` suppresses everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Quiet,
}

impl Level {
    fn from_env() -> Self {
        match std::env::var(LEVEL_ENV).as_deref() {
            Ok(s) if s.starts_with("DEBUG") => Level::Debug,
            Ok(s) if s.starts_with("INFO") => Level::Info,
            Ok(s) if s.starts_with("WARN") => Level::Warn,
            Ok(s) if s.starts_with("ERROR") => Level::Error,
            Ok(s) if s.starts_with("QUIET") => Level::Quiet,
            _ => Level::Info,
        }
    }
}

/// Failure to construct a logger (file sink could not be opened).
#[derive(Debug)]
pub struct LoggerError {
    path: String,
    source: std::io::Error,
}

impl fmt::Display for LoggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot open log file {}: {}", self.path, self.source)
    }
}

impl Error for LoggerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

enum SinkKind {
    Tracing,
    File(Mutex<BufWriter<File>>),
}

/// Rank-stamped leveled logger.
pub struct Logger {
    rank: usize,
    level: Level,
    sink: SinkKind,
}

impl Logger {
    /// Logger for `rank`, level from the environment, events via `tracing`.
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            level: Level::from_env(),
            sink: SinkKind::Tracing,
        }
    }

    /// Logger writing plain lines to `path`. The file is created (or
    /// truncated) now; failure to open is reported immediately.
    pub fn to_file<P: AsRef<Path>>(rank: usize, path: P) -> Result<Self, LoggerError> {
        let file = File::create(path.as_ref()).map_err(|source| LoggerError {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Ok(Self {
            rank,
            level: Level::from_env(),
            sink: SinkKind::File(Mutex::new(BufWriter::new(file))),
        })
    }

    /// Effective level.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Overrides the environment-derived level.
    pub fn set_level(&mut self, level: Level) {
        self.level = level;
    }

    /// Peer rank this logger is stamped with.
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.level && self.level != Level::Quiet && level != Level::Quiet
    }

    pub fn debug(&self, module: &str, msg: fmt::Arguments<'_>) {
        self.emit(Level::Debug, module, msg);
    }

    pub fn info(&self, module: &str, msg: fmt::Arguments<'_>) {
        self.emit(Level::Info, module, msg);
    }

    pub fn warn(&self, module: &str, msg: fmt::Arguments<'_>) {
        self.emit(Level::Warn, module, msg);
    }

    pub fn error(&self, module: &str, msg: fmt::Arguments<'_>) {
        self.emit(Level::Error, module, msg);
    }

    fn emit(&self, level: Level, module: &str, msg: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        match &self.sink {
            SinkKind::Tracing => {
                let rendered = format!("{msg}");
                match level {
                    Level::Debug => {
                        tracing::debug!(rank = self.rank, module, "{}", rendered)
                    }
                    Level::Info => tracing::info!(rank = self.rank, module, "{}", rendered),
                    Level::Warn => tracing::warn!(rank = self.rank, module, "{}", rendered),
                    Level::Error => tracing::error!(rank = self.rank, module, "{}", rendered),
                    Level::Quiet => {}
                }
            }
            SinkKind::File(w) => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                let tag = match level {
                    Level::Debug => "DEBUG",
                    Level::Info => "INFO",
                    Level::Warn => "WARN",
                    Level::Error => "ERROR",
                    Level::Quiet => return,
                };
                let mut w = w.lock().unwrap_or_else(|e| e.into_inner());
                // Losing a line on a full disk is preferable to failing the
                // superstep; flush keeps per-rank files usable post-mortem.
                let _ = writeln!(w, "[{secs:.3}] [{tag}] [{}] {module}: {msg}", self.rank);
                let _ = w.flush();
            }
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("rank", &self.rank)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// Convenience macros so call sites read like the rest of the codebase:
/// `log_info!(self.log, "runtime", "processing {} tasks", n)`.
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $module:expr, $($arg:tt)*) => {
        $logger.debug($module, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $module:expr, $($arg:tt)*) => {
        $logger.info($module, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $module:expr, $($arg:tt)*) => {
        $logger.warn($module, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $module:expr, $($arg:tt)*) => {
        $logger.error($module, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_order() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Quiet);
    }

    #[test]
    fn quiet_disables_everything() {
        let mut log = Logger::new(0);
        log.set_level(Level::Quiet);
        assert!(!log.enabled(Level::Error));
        assert!(!log.enabled(Level::Debug));
    }

    #[test]
    fn threshold_filters_below() {
        let mut log = Logger::new(0);
        log.set_level(Level::Warn);
        assert!(!log.enabled(Level::Debug));
        assert!(!log.enabled(Level::Info));
        assert!(log.enabled(Level::Warn));
        assert!(log.enabled(Level::Error));
    }

    #[test]
    fn file_sink_open_failure_is_reported() {
        let err = Logger::to_file(0, "/nonexistent-dir-scool/x.log");
        assert!(err.is_err());
        let msg = err.err().unwrap().to_string();
        assert!(msg.contains("cannot open log file"));
    }

    #[test]
    fn file_sink_writes_lines() {
        let dir = std::env::temp_dir().join("scool-logger-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rank3.log");

        let log = Logger::to_file(3, &path).unwrap();
        log_info!(log, "runtime", "processing {} tasks", 12);
        log_error!(log, "runtime", "mismatch");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[INFO] [3] runtime: processing 12 tasks"));
        assert!(content.contains("[ERROR] [3] runtime: mismatch"));
        std::fs::remove_file(&path).ok();
    }
}
