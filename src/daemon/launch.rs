//! Turning a foreground `start` invocation into a detached daemon.
//!
//! POSIX gets the classic double fork: the grandchild drops its
//! controlling terminal with `setsid`, keeps the working directory,
//! points stdio at `/dev/null` and runs the server loop in-place. The
//! intermediate child exits immediately and is reaped by the parent, so
//! no zombie is left and the daemon is reparented to init.
//!
//! Windows cannot detach in-process, so `start` spawns a new copy of the
//! program with the `serve` directive, created detached from the parent's
//! console and process group. Resolved options travel through a single
//! environment variable, the only channel available to a parent that
//! cannot hand the child structured input, and the child consumes and
//! clears it immediately at startup.

use crate::daemon::options::ServeOptions;
use crate::error::{Result, StokerError};

/// Environment variable carrying serialized [`ServeOptions`] from the
/// launcher to its detached child.
pub const OPTIONS_ENV: &str = "STOKER_SERVE_OPTIONS";

/// Read and clear the options payload left by a launcher.
///
/// The variable is removed before parsing so the payload never leaks
/// into anything this process spawns.
pub fn take_env_options() -> Result<serde_json::Value> {
    let raw = std::env::var(OPTIONS_ENV).map_err(|_| {
        StokerError::InvalidOptions(format!("{OPTIONS_ENV} is not set"))
    })?;
    // Safety: runs once at startup, before any threads are spawned.
    unsafe {
        std::env::remove_var(OPTIONS_ENV);
    }
    Ok(serde_json::from_str(&raw)?)
}

/// Launch the daemon as a detached background process and return
/// immediately in the invoking process.
///
/// On POSIX `serve_child` runs the server loop inside the forked daemon
/// context and never returns to the caller's control flow; the runtime
/// must be built inside it, after the fork. On Windows `serve_child` is
/// unused and a detached `serve` subprocess is spawned instead.
#[cfg(unix)]
pub fn start_daemon(
    options: &ServeOptions,
    serve_child: impl FnOnce(ServeOptions) -> Result<()>,
) -> Result<()> {
    match daemonize()? {
        Fork::Parent => Ok(()),
        Fork::Child => {
            let code = match serve_child(options.clone()) {
                Ok(()) => 0,
                Err(_) => 1,
            };
            std::process::exit(code);
        }
    }
}

#[cfg(windows)]
pub fn start_daemon(
    options: &ServeOptions,
    _serve_child: impl FnOnce(ServeOptions) -> Result<()>,
) -> Result<()> {
    use std::os::windows::process::CommandExt;
    use std::process::{Command, Stdio};

    const DETACHED_PROCESS: u32 = 0x00000008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
    const CREATE_NO_WINDOW: u32 = 0x08000000;

    let current_exe = std::env::current_exe()?;
    Command::new(current_exe)
        .arg("serve")
        .env(OPTIONS_ENV, serde_json::to_string(options)?)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW)
        .spawn()
        .map_err(|e| StokerError::Launch(format!("failed to spawn serve child: {e}")))?;

    // The parent does not wait on the child
    Ok(())
}

#[cfg(unix)]
enum Fork {
    Parent,
    Child,
}

/// Double-fork into a daemon context. Returns `Fork::Parent` in the
/// invoking process and `Fork::Child` in the detached grandchild.
#[cfg(unix)]
fn daemonize() -> Result<Fork> {
    // Safety: fork/setsid/waitpid with no allocation between fork and the
    // child's early exits; the grandchild continues into normal Rust code.
    unsafe {
        let pid = libc::fork();
        if pid < 0 {
            return Err(StokerError::Launch(format!(
                "fork failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        if pid > 0 {
            // Reap the intermediate child, which exits right away
            let mut status = 0;
            libc::waitpid(pid, &mut status, 0);
            return Ok(Fork::Parent);
        }

        // Intermediate child: new session, no controlling terminal
        if libc::setsid() < 0 {
            libc::_exit(1);
        }
        let pid = libc::fork();
        if pid < 0 {
            libc::_exit(1);
        }
        if pid > 0 {
            // Intermediate exits; the daemon is reparented to init
            libc::_exit(0);
        }
    }

    // Grandchild: the daemon. The working directory is kept so relative
    // transport paths resolve the same as in the invoking process.
    redirect_stdio_to_null()?;
    Ok(Fork::Child)
}

#[cfg(unix)]
fn redirect_stdio_to_null() -> Result<()> {
    use std::os::fd::AsRawFd;

    let null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    let null_fd = null.as_raw_fd();
    // Safety: dup2 onto the three standard descriptors of this process.
    unsafe {
        libc::dup2(null_fd, libc::STDIN_FILENO);
        libc::dup2(null_fd, libc::STDOUT_FILENO);
        libc::dup2(null_fd, libc::STDERR_FILENO);
    }
    Ok(())
}
