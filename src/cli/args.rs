use clap::{Parser, Subcommand};
use serde::Deserialize;

/// Stoker - keeps a render kernel warm across repeated invocations
#[derive(Parser)]
#[command(name = "stoker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// With a subcommand, options arrive through the environment channel;
    /// without one, a `{command, options}` payload is read from stdin.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Commands {
    /// Launch the daemon as a detached background process and return
    Start,
    /// Run the daemon loop in the foreground (used as the detached child)
    Serve,
    /// Execute one unit of work synchronously and exit
    Execute,
}

/// Structured invocation payload read from stdin when no subcommand is
/// given.
#[derive(Deserialize, Debug)]
pub struct StdinPayload {
    pub command: Commands,
    #[serde(default)]
    pub options: serde_json::Value,
}
