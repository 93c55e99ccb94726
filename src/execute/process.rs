//! Subprocess-backed execution delegate.
//!
//! Runs the kernel runner named by `options.run` as a child process and
//! relays its stdout lines as status messages. The runner signals a
//! required kernel restart with exit code 75 (EX_TEMPFAIL); any other
//! nonzero exit is a failure carrying the captured stderr.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};

use crate::execute::{ExecutionDelegate, Outcome};

/// Exit code by which a kernel runner requests a restart.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Delegate that shells out to a kernel runner process.
///
/// Recognized option fields:
/// - `run`: argv array naming the runner and its arguments (required)
/// - `persist`: whether the daemon should stay warm afterwards
///   (default true)
///
/// Everything else in the options object is the runner's business.
#[derive(Debug, Default)]
pub struct ProcessDelegate;

impl ProcessDelegate {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionDelegate for ProcessDelegate {
    fn execute(&self, options: &serde_json::Value, status: &mut dyn FnMut(&str)) -> Outcome {
        let argv = match runner_argv(options) {
            Ok(argv) => argv,
            Err(message) => return Outcome::Failed(message),
        };

        let mut child = match Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Outcome::Failed(format!("failed to launch kernel runner {}: {e}", argv[0]));
            }
        };

        // Drain stderr on a side thread so neither pipe can fill up and
        // stall the runner while we stream stdout.
        let stderr_reader = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                let mut captured = String::new();
                let _ = BufReader::new(stderr).read_to_string(&mut captured);
                captured
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => status(&line),
                    Err(_) => break,
                }
            }
        }

        let exit = match child.wait() {
            Ok(exit) => exit,
            Err(e) => return Outcome::Failed(format!("kernel runner did not exit cleanly: {e}")),
        };
        let captured_stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        match exit.code() {
            Some(0) => Outcome::Completed {
                persist: options
                    .get("persist")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(true),
            },
            Some(RESTART_EXIT_CODE) => Outcome::Restart,
            code => {
                let trimmed = captured_stderr.trim();
                if trimmed.is_empty() {
                    Outcome::Failed(match code {
                        Some(code) => format!("kernel runner exited with status {code}"),
                        None => "kernel runner was killed by a signal".to_string(),
                    })
                } else {
                    Outcome::Failed(trimmed.to_string())
                }
            }
        }
    }
}

fn runner_argv(options: &serde_json::Value) -> std::result::Result<Vec<String>, String> {
    let run = options
        .get("run")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| "options.run must be an argv array naming the kernel runner".to_string())?;

    let argv: Vec<String> = run
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| "options.run entries must be strings".to_string())
        })
        .collect::<std::result::Result<_, _>>()?;

    if argv.is_empty() {
        return Err("options.run must not be empty".to_string());
    }
    Ok(argv)
}
