use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use stoker::cli::args::{Cli, Commands, StdinPayload};
use stoker::daemon::launch;
use stoker::daemon::options::ServeOptions;
use stoker::daemon::server::run_server;
use stoker::error::{Result, StokerError, exit_codes};
use stoker::execute::{ProcessDelegate, run_once};
use stoker::logging;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // Subcommand invocations get their options through the environment
    // channel (set by the launcher); a bare invocation reads a structured
    // {command, options} payload from stdin instead.
    let (command, options) = match cli.command {
        Some(command) => (command, launch::take_env_options()?),
        None => {
            let payload: StdinPayload = serde_json::from_reader(std::io::stdin())
                .map_err(|e| StokerError::InvalidOptions(format!("bad stdin payload: {e}")))?;
            (payload.command, payload.options)
        }
    };

    match command {
        // No logging init here: the daemon child sets up its own file
        // logging and the parent returns immediately.
        Commands::Start => launch::start_daemon(&serve_options(options)?, serve),

        Commands::Serve => serve(serve_options(options)?),

        Commands::Execute => {
            logging::init_foreground();
            run_once(&ProcessDelegate::new(), &options)
        }
    }
}

fn serve_options(options: serde_json::Value) -> Result<ServeOptions> {
    serde_json::from_value(options)
        .map_err(|e| StokerError::InvalidOptions(format!("bad server options: {e}")))
}

/// Run the daemon loop in the foreground of the current process.
///
/// Called directly for the `serve` directive (the detached Windows child)
/// and inside the forked daemon context on POSIX, which is why the
/// runtime is built here rather than in `main`.
fn serve(options: ServeOptions) -> Result<()> {
    let log_dir = options
        .transport
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let _guard = logging::init_daemon(&log_dir);
    tracing::info!("stoker daemon starting, version {}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run_server(options, ProcessDelegate::new()));
    match &result {
        Ok(()) => tracing::info!("stoker daemon shutdown complete"),
        Err(e) => tracing::error!("unable to run server: {e}"),
    }
    result
}
