//! Thin wrapper around `slog` + `sloggers` so every crate in the workspace builds its root
//! logger the same way and child loggers the same way.
pub use slog::{debug, error, info, o, trace, warn, Logger};

use serde_derive::{Deserialize, Serialize};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::{Format, Severity};
use sloggers::Build;

/// How the root logger should be built. Mirrors the knobs a server/client binary exposes on its
/// CLI (`--log-level`, `--log-format`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for Severity {
    fn from(level: LogLevel) -> Severity {
        match level {
            LogLevel::Trace => Severity::Trace,
            LogLevel::Debug => Severity::Debug,
            LogLevel::Info => Severity::Info,
            LogLevel::Warning => Severity::Warning,
            LogLevel::Error => Severity::Error,
        }
    }
}

/// Builds the root logger for a process. Every component then derives a child logger from this
/// one via `log.new(o!("component" => "..."))`.
pub fn init(config: &LoggingConfig) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(config.level.into());
    builder.destination(Destination::Stderr);
    builder.format(if config.json { Format::Json } else { Format::Compact });

    builder.build().expect("logger configuration must be valid")
}
