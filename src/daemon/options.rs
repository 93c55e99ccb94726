//! Server construction options.
//!
//! Options arrive either as a structured stdin payload or through the
//! environment channel when the daemon is launched as a detached child.
//! Only three fields are recognized here; everything else is opaque
//! delegate configuration and round-trips untouched.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The connection medium the daemon binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Loopback TCP socket with an OS-assigned port, published through a
    /// descriptor artifact holding `{port, secret}`.
    Network,
    /// Unix domain socket at an explicit filesystem path. The path itself
    /// is the descriptor; filesystem permissions are the gate.
    Local,
}

/// Options for one daemon instance. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeOptions {
    #[serde(rename = "type")]
    pub kind: TransportKind,

    /// Descriptor artifact path: the file holding `{port, secret}` for
    /// network transport, or the socket path itself for local transport.
    pub transport: PathBuf,

    /// Idle timeout in seconds between serviced requests. `None` waits
    /// indefinitely.
    pub timeout: Option<u64>,

    /// Delegate-specific fields, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
