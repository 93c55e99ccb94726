//! Wire protocol types and newline-delimited JSON framing.
//!
//! A connection carries exactly one request line from the client, followed
//! by zero or more status lines and at most one terminal message from the
//! server:
//!
//! ```text
//! client -> {"secret": "...", "command": "execute", "options": {...}}\n
//! server -> {"type": "status", "data": "..."}\n        (zero or more)
//! server -> {"type": "restart"} | {"type": "error", "data": "..."}\n
//! ```
//!
//! A clean close with no terminal message signals success. Every server
//! write is flushed immediately so the client observes live progress.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::error::{Result, StokerError};

/// Request sent by the client as a single newline-terminated JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Must exactly match the instance secret (empty for local transport).
    pub secret: String,
    pub command: Command,
    /// Opaque delegate options; only meaningful for `execute`.
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Shut the daemon down without executing anything.
    Abort,
    /// Run one unit of work through the execution delegate.
    Execute,
}

/// Message written back to the client, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Live progress from the delegate, emitted in report order.
    Status { data: String },
    /// The kernel must be restarted; the daemon exits after sending this.
    Restart,
    /// The unit of work failed; the daemon exits after sending this.
    Error { data: String },
}

/// Read one newline-terminated request from the client.
///
/// A closed connection or a line that does not parse as an
/// [`ExecuteRequest`] is a protocol error; the caller treats it as fatal.
pub async fn read_request<R>(reader: &mut R) -> Result<ExecuteRequest>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(StokerError::Protocol(
            "connection closed before a request line was received".to_string(),
        ));
    }
    serde_json::from_str(line.trim())
        .map_err(|e| StokerError::Protocol(format!("malformed request line: {e}")))
}

/// Serialize, write and flush one server message.
pub async fn write_message<W>(writer: &mut W, message: &ServerMessage) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let mut json = serde_json::to_vec(message)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one server message, or `None` once the server has closed the
/// connection.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<ServerMessage>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let message = serde_json::from_str(line.trim())
        .map_err(|e| StokerError::Protocol(format!("malformed server message: {e}")))?;
    Ok(Some(message))
}

/// Serialize, write and flush one request line.
pub async fn write_request<W>(writer: &mut W, request: &ExecuteRequest) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let mut json = serde_json::to_vec(request)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}
