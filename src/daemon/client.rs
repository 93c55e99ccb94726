//! Client side of the daemon protocol.
//!
//! The render pipeline discovers a running daemon through its descriptor
//! artifact, opens one connection per unit of work, sends a single
//! request line and consumes the message stream until the server closes
//! the connection. The integration tests drive the daemon the same way.

use std::path::Path;

use tokio::io::BufReader;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::daemon::listener::{ConnectionDescriptor, ExecStream};
use crate::daemon::options::{ServeOptions, TransportKind};
use crate::daemon::protocol::{
    Command, ExecuteRequest, ServerMessage, read_message, write_request,
};
use crate::error::{Result, StokerError};

/// How an execution ended, from the client's point of view.
///
/// A clean close with no terminal message is success; `restart` and
/// `error` are the only terminal messages the server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionReply {
    Success,
    Restart,
    Failed(String),
}

/// A connection to the warm-kernel daemon.
pub struct DaemonClient {
    stream: BufReader<ExecStream>,
    secret: String,
}

impl DaemonClient {
    /// Connect using the same options the daemon was started with: read
    /// the descriptor artifact for network transport, or dial the socket
    /// path directly for local transport.
    pub async fn connect(options: &ServeOptions) -> Result<Self> {
        match options.kind {
            TransportKind::Network => {
                let descriptor = ConnectionDescriptor::read(&options.transport)?;
                Self::connect_network(&descriptor).await
            }
            TransportKind::Local => Self::connect_local(&options.transport).await,
        }
    }

    /// Connect to a network-transport daemon from an already-read
    /// descriptor.
    pub async fn connect_network(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", descriptor.port))
            .await
            .map_err(|e| {
                StokerError::Connection(format!(
                    "failed to connect to 127.0.0.1:{}: {e}",
                    descriptor.port
                ))
            })?;
        Ok(Self {
            stream: BufReader::new(ExecStream::Tcp(stream)),
            secret: descriptor.secret.clone(),
        })
    }

    /// Connect to a local-transport daemon at its socket path.
    #[cfg(unix)]
    pub async fn connect_local(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            StokerError::Connection(format!("failed to connect to {}: {e}", path.display()))
        })?;
        Ok(Self {
            stream: BufReader::new(ExecStream::Local(stream)),
            secret: String::new(),
        })
    }

    #[cfg(not(unix))]
    pub async fn connect_local(_path: &Path) -> Result<Self> {
        Err(StokerError::UnsupportedTransport(
            "local transport requires Unix domain sockets".to_string(),
        ))
    }

    /// Run one unit of work, invoking `on_status` for each status line as
    /// it arrives.
    pub async fn execute(
        &mut self,
        options: serde_json::Value,
        mut on_status: impl FnMut(&str),
    ) -> Result<ExecutionReply> {
        self.send(Command::Execute, options).await?;
        loop {
            match read_message(&mut self.stream).await? {
                Some(ServerMessage::Status { data }) => on_status(&data),
                Some(ServerMessage::Restart) => return Ok(ExecutionReply::Restart),
                Some(ServerMessage::Error { data }) => return Ok(ExecutionReply::Failed(data)),
                None => return Ok(ExecutionReply::Success),
            }
        }
    }

    /// Ask the daemon to shut down. The server closes without a reply.
    pub async fn abort(mut self) -> Result<()> {
        self.send(Command::Abort, serde_json::Value::Null).await?;
        // Wait for the close; any message here would be a protocol bug
        match read_message(&mut self.stream).await? {
            None => Ok(()),
            Some(message) => Err(StokerError::Protocol(format!(
                "unexpected reply to abort: {message:?}"
            ))),
        }
    }

    /// Read the next raw message, or `None` once the server has closed.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>> {
        read_message(&mut self.stream).await
    }

    /// Send a request line carrying the given secret instead of the
    /// discovered one. Exists so tests can probe the auth path.
    pub async fn send_with_secret(
        &mut self,
        secret: &str,
        command: Command,
        options: serde_json::Value,
    ) -> Result<()> {
        let request = ExecuteRequest {
            secret: secret.to_string(),
            command,
            options,
        };
        write_request(&mut self.stream, &request).await
    }

    async fn send(&mut self, command: Command, options: serde_json::Value) -> Result<()> {
        let request = ExecuteRequest {
            secret: self.secret.clone(),
            command,
            options,
        };
        write_request(&mut self.stream, &request).await
    }
}
