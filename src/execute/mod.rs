//! The execution seam and the one-shot path.
//!
//! The engine that actually runs a unit of work is an external
//! collaborator behind [`ExecutionDelegate`]; the daemon and the one-shot
//! path only care about its status stream and its tagged [`Outcome`].

use crate::error::{Result, StokerError};

pub mod process;

pub use process::ProcessDelegate;

/// Runs one unit of work and reports how it ended.
///
/// `status` is invoked for each progress message, in order; the caller
/// relays each invocation to its output before the next one runs.
pub trait ExecutionDelegate: Send + Sync + 'static {
    fn execute(&self, options: &serde_json::Value, status: &mut dyn FnMut(&str)) -> Outcome;
}

/// Tagged result of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The work finished. `persist: false` asks the daemon to exit after
    /// this request instead of staying warm.
    Completed { persist: bool },
    /// The kernel must be restarted before it can run anything else.
    Restart,
    /// The work failed with a message for the client.
    Failed(String),
}

/// Kernel runners report cell failures with internal frames ahead of this
/// marker; everything up to and including it is noise for terminal users.
pub const EXEC_ERROR_MARKER: &str = "CellExecutionError: ";

/// Strip internal stack-trace prefixes from a failure message.
pub fn strip_error_marker(message: &str) -> &str {
    match message.find(EXEC_ERROR_MARKER) {
        Some(loc) => &message[loc + EXEC_ERROR_MARKER.len()..],
        None => message,
    }
}

/// Run one unit of work without a daemon: status goes straight to stderr,
/// failures come back trimmed for terminal display.
///
/// No lifecycle or timeout concerns apply here. A restart outcome cannot
/// be honored without a daemon and is surfaced as an error.
pub fn run_once<D: ExecutionDelegate>(delegate: &D, options: &serde_json::Value) -> Result<()> {
    use std::io::Write;

    let mut status = |msg: &str| {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{msg}");
        let _ = stderr.flush();
    };

    match delegate.execute(options, &mut status) {
        Outcome::Completed { .. } => Ok(()),
        Outcome::Restart => Err(StokerError::Execution(
            "kernel restart requested outside daemon mode".to_string(),
        )),
        Outcome::Failed(message) => Err(StokerError::Execution(
            strip_error_marker(&message).to_string(),
        )),
    }
}
