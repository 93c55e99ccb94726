//! Transport binding and descriptor artifact publication.
//!
//! The daemon listens on one of two transports:
//!
//! - **network**: a loopback TCP socket on an OS-assigned port. The port
//!   and a per-instance secret are published through a descriptor file
//!   that clients read to find the daemon.
//! - **local** (Unix only): a Unix domain socket at an explicit path. The
//!   path itself is the descriptor and filesystem permissions are the
//!   gate, so the secret is the empty string.
//!
//! ## Security
//!
//! The descriptor file is truncated and restricted to owner read/write
//! *before* any secret material is written into it, so there is no window
//! where the secret is world-readable. The socket file gets the same mode
//! as defense in depth. Both are removed before the daemon exits, on
//! every exit path; `Drop` is the backstop for paths that never reach an
//! explicit [`ExecListener::close`].

use std::fs;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use crate::daemon::options::{ServeOptions, TransportKind};
use crate::error::{Result, StokerError};

/// Contents of the descriptor artifact for network transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub port: u16,
    pub secret: String,
}

impl ConnectionDescriptor {
    /// Read a descriptor previously published by [`ExecListener::bind`].
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StokerError::Connection(format!("failed to read descriptor {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            StokerError::Connection(format!("malformed descriptor {}: {e}", path.display()))
        })
    }
}

enum Endpoint {
    Tcp(TcpListener),
    #[cfg(unix)]
    Local(UnixListener),
}

/// One accepted connection, over either transport.
#[derive(Debug)]
pub enum ExecStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Local(UnixStream),
}

impl AsyncRead for ExecStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ExecStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            ExecStream::Local(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ExecStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ExecStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            ExecStream::Local(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ExecStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            ExecStream::Local(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ExecStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            ExecStream::Local(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Bound endpoint plus the published descriptor artifact.
pub struct ExecListener {
    endpoint: Option<Endpoint>,
    transport: PathBuf,
    secret: String,
    port: Option<u16>,
}

impl ExecListener {
    /// Bind the endpoint selected by `options` and publish the descriptor.
    ///
    /// Bind failure (address in use, permission denied) is fatal and
    /// leaves no artifact behind.
    pub async fn bind(options: &ServeOptions) -> Result<Self> {
        match options.kind {
            TransportKind::Network => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                let secret = Uuid::new_v4().to_string();

                let descriptor = ConnectionDescriptor {
                    port,
                    secret: secret.clone(),
                };
                if let Err(e) = write_descriptor(&options.transport, &descriptor) {
                    // Never leave a partial artifact after a failed bind
                    let _ = fs::remove_file(&options.transport);
                    return Err(e);
                }

                Ok(Self {
                    endpoint: Some(Endpoint::Tcp(listener)),
                    transport: options.transport.clone(),
                    secret,
                    port: Some(port),
                })
            }

            #[cfg(unix)]
            TransportKind::Local => {
                // Remove a stale socket from a previous run
                if options.transport.exists() {
                    fs::remove_file(&options.transport)?;
                }

                let listener = UnixListener::bind(&options.transport)?;
                restrict_to_owner(&options.transport)?;

                Ok(Self {
                    endpoint: Some(Endpoint::Local(listener)),
                    transport: options.transport.clone(),
                    secret: String::new(),
                    port: None,
                })
            }

            #[cfg(not(unix))]
            TransportKind::Local => Err(StokerError::UnsupportedTransport(
                "local transport requires Unix domain sockets".to_string(),
            )),
        }
    }

    /// Wait for the next connection.
    pub async fn accept(&self) -> Result<ExecStream> {
        let endpoint = self.endpoint.as_ref().ok_or_else(|| {
            StokerError::Connection("listener is closed".to_string())
        })?;
        match endpoint {
            Endpoint::Tcp(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(ExecStream::Tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Local(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(ExecStream::Local(stream))
            }
        }
    }

    /// The instance secret: a fresh uuid for network transport, the empty
    /// string for local transport. Immutable for the process lifetime.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Exact-equality secret check. The empty local-transport secret is
    /// compared exactly like any other, not special-cased.
    pub fn validate(&self, candidate: &str) -> bool {
        candidate == self.secret
    }

    /// Bound port for network transport.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Path of the descriptor artifact (or local socket).
    pub fn transport(&self) -> &Path {
        &self.transport
    }

    /// Close the endpoint and delete the artifact. Idempotent.
    pub fn close(&mut self) {
        self.endpoint = None;
        match fs::remove_file(&self.transport) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("failed to remove {}: {e}", self.transport.display());
            }
        }
    }
}

impl Drop for ExecListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Publish the descriptor: create/truncate, restrict to owner read/write,
/// then write the real content. The secret must never hit disk before the
/// permissions do.
fn write_descriptor(path: &Path, descriptor: &ConnectionDescriptor) -> Result<()> {
    fs::write(path, b"")?;
    restrict_to_owner(path)?;
    fs::write(path, serde_json::to_vec(descriptor)?)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<()> {
    // Windows files are per-user under the profile directory already
    Ok(())
}
