//! Logging bootstrap. Builds a `slog::Logger` that drains to both a
//! `cluster_run.log` file under the result directory and the terminal.

use anyhow::{Context, Result};
use slog::{o, Drain};
use std::path::Path;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    fn as_slog_level(self) -> slog::Level {
        match self {
            LogLevel::Error => slog::Level::Error,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Debug => slog::Level::Debug,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

/// Builds a logger that writes to `log_file_path` (created if necessary)
/// and calls `f` with it. Logging setup failures (an unwritable result
/// directory) are orchestrator-level fatal errors, so this returns
/// `Result` rather than silently degrading.
pub fn run_with_logger<T>(
    level: LogLevel,
    log_file_path: &Path,
    f: impl FnOnce(slog::Logger) -> Result<T>,
) -> Result<T> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .with_context(|| format!("opening log file {}", log_file_path.display()))?;

    let file_decorator = slog_term::PlainDecorator::new(file);
    let file_drain = slog_term::FullFormat::new(file_decorator).build().fuse();

    let term_decorator = slog_term::TermDecorator::new().build();
    let term_drain = slog_term::FullFormat::new(term_decorator).build().fuse();

    let drain = slog::Duplicate::new(file_drain, term_drain).fuse();
    let drain = slog::LevelFilter::new(drain, level.as_slog_level()).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!());

    f(logger)
}
