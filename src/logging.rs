//! Logging initialization for foreground and daemon modes.
//!
//! Foreground commands (`start`, `execute`) log to stderr, filtered by the
//! `STOKER_LOG` environment variable. The detached daemon has no terminal,
//! so `serve` logs to a file next to the transport artifact instead.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter (e.g. `stoker=debug`).
pub const LOG_ENV: &str = "STOKER_LOG";

/// Log file name, created in the directory holding the transport artifact.
pub const LOG_FILE: &str = "stoker-daemon.log";

/// Initialize stderr logging for foreground commands.
///
/// Silent by default; set `STOKER_LOG` to enable output.
pub fn init_foreground() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Initialize file logging for the daemon.
///
/// Writes to `stoker-daemon.log` in `log_dir` through a non-blocking
/// appender. The returned guard must be kept alive for the daemon's
/// lifetime so buffered records are flushed on exit.
pub fn init_daemon(log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .init();

    guard
}
