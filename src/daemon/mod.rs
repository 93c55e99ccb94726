//! The warm-kernel daemon.
//!
//! A render pipeline talks to a single long-lived daemon process over a
//! loopback TCP socket or a Unix domain socket, sending one request per
//! connection and reading back a stream of newline-delimited messages.
//!
//! ## Components
//!
//! - [`options`]: server construction options (transport, idle timeout)
//! - [`protocol`]: request/message types and newline-delimited framing
//! - [`listener`]: transport binding and the connection descriptor artifact
//! - [`server`]: the accept loop, idle timeout and exit-pending state
//! - [`client`]: client used by the pipeline and the integration tests
//! - [`launch`]: detached-process launching and the environment channel

pub mod client;
pub mod launch;
pub mod listener;
pub mod options;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use listener::{ConnectionDescriptor, ExecListener, ExecStream};
pub use options::{ServeOptions, TransportKind};
pub use protocol::{Command, ExecuteRequest, ServerMessage};
pub use server::run_server;
