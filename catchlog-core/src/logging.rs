//! Logging infrastructure for catchlog
//!
//! Logs are written to `~/.local/state/catchlog/catchlog.log` following XDG standards.
//!
//! The configured level applies to catchlog's own targets. The HTTP stack
//! under the catch client (reqwest, hyper, rustls) is capped at `warn`.
//! `RUST_LOG` overrides both.

use crate::config::{Config, LoggingConfig};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize the logging system
///
/// Sets up tracing with:
/// - File output to XDG state directory
/// - Daily rotation, keeping at most `max_files` files
/// - Configurable log level via config or RUST_LOG env var
/// - HTTP client internals capped at `warn`
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("catchlog.log")
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| crate::error::Error::Config(format!("failed to create log file: {}", e)))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.level)));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        version = env!("CARGO_PKG_VERSION"),
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Filter directives for a configured level
fn filter_directives(level: &str) -> String {
    let mut directives = level.trim().to_string();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{}=warn", target));
    }
    directives
}

/// Dependencies whose logs stay at `warn` unless RUST_LOG says otherwise
const QUIET_TARGETS: [&str; 4] = ["reqwest", "hyper", "hyper_util", "rustls"];

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Returns the log file path
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        let path = log_file_path();
        assert!(path.ends_with("catchlog.log"));
    }

    #[test]
    fn test_filter_directives_quiet_http_stack() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
        assert!(directives.contains("rustls=warn"));

        // Must parse as a filter
        let _ = EnvFilter::try_new(&directives).unwrap();
    }

    #[test]
    fn test_filter_directives_accept_target_levels() {
        let directives = filter_directives(" catchlog_core=trace ");
        assert!(directives.starts_with("catchlog_core=trace,"));
        let _ = EnvFilter::try_new(&directives).unwrap();
    }
}
