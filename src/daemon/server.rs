//! The daemon accept loop.
//!
//! One connection is processed at a time; the accept call is the only
//! blocking point and it is bounded by the configured idle timeout. The
//! handler reads exactly one request line, authenticates it, and either
//! shuts the daemon down or runs the execution delegate while streaming
//! status lines back to the client.
//!
//! The exit-pending flag is consulted before every accept, so the request
//! that sets it is always the daemon's last. Malformed requests propagate
//! out of the loop; the caller logs them and exits nonzero. Endpoint and
//! descriptor cleanup runs on every exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::sync::mpsc;

use crate::daemon::listener::{ExecListener, ExecStream};
use crate::daemon::options::ServeOptions;
use crate::daemon::protocol::{Command, ServerMessage, read_request, write_message};
use crate::error::Result;
use crate::execute::{ExecutionDelegate, Outcome};

/// Bind the listener and drive the accept loop until the daemon is done.
///
/// Returns `Ok(())` on voluntary exit (abort, idle timeout, non-persist
/// outcome, auth failure) and `Err` when a protocol or transport error
/// escapes the loop. The endpoint and descriptor artifact are released in
/// both cases.
pub async fn run_server<D: ExecutionDelegate>(options: ServeOptions, delegate: D) -> Result<()> {
    let mut server = ExecServer::bind(&options, delegate).await?;
    let result = server.run().await;
    server.close();
    result
}

/// The daemon: listener, delegate and lifecycle state.
pub struct ExecServer<D> {
    listener: ExecListener,
    delegate: Arc<D>,
    idle_timeout: Option<Duration>,
    exit_pending: bool,
}

impl<D: ExecutionDelegate> ExecServer<D> {
    /// Bind the transport selected by `options` and publish the
    /// descriptor artifact.
    pub async fn bind(options: &ServeOptions, delegate: D) -> Result<Self> {
        let listener = ExecListener::bind(options).await?;
        match listener.port() {
            Some(port) => tracing::info!("listening on 127.0.0.1:{port}"),
            None => tracing::info!("listening on {}", listener.transport().display()),
        }
        Ok(Self {
            listener,
            delegate: Arc::new(delegate),
            idle_timeout: options.timeout.map(Duration::from_secs),
            exit_pending: false,
        })
    }

    /// Accept and handle requests until exit is pending or the idle
    /// timeout elapses with no client contact.
    ///
    /// The timeout window restarts on each loop iteration, i.e. it is
    /// measured from the last completed request and is inert while an
    /// execution is in flight.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if self.exit_pending {
                return Ok(());
            }

            let stream = match self.idle_timeout {
                Some(window) => {
                    match tokio::time::timeout(window, self.listener.accept()).await {
                        Ok(accepted) => accepted?,
                        Err(_elapsed) => {
                            tracing::info!("idle timeout reached, shutting down");
                            return Ok(());
                        }
                    }
                }
                None => self.listener.accept().await?,
            };

            self.handle(stream).await?;
        }
    }

    /// Release the endpoint and remove the descriptor artifact.
    pub fn close(&mut self) {
        self.listener.close();
    }

    /// Handle one connection: read the request line, authenticate,
    /// dispatch. The connection closes when the returned future resolves.
    async fn handle(&mut self, stream: ExecStream) -> Result<()> {
        let mut stream = BufReader::new(stream);
        let request = read_request(&mut stream).await?;

        // The daemon expects exactly one cooperating client; any secret
        // mismatch is a fatal protocol violation, not a recoverable auth
        // failure. Close with no reply so nothing leaks to the caller.
        if !self.listener.validate(&request.secret) {
            tracing::warn!("request with invalid secret, shutting down");
            self.exit_pending = true;
            return Ok(());
        }

        match request.command {
            Command::Abort => {
                tracing::info!("abort requested");
                self.exit_pending = true;
                Ok(())
            }
            Command::Execute => self.execute(stream, request.options).await,
        }
    }

    /// Run the delegate on the blocking pool and relay its status
    /// messages to the client as they are reported.
    async fn execute(
        &mut self,
        mut stream: BufReader<ExecStream>,
        options: serde_json::Value,
    ) -> Result<()> {
        let (status_tx, mut status_rx) = mpsc::unbounded_channel::<String>();
        let delegate = Arc::clone(&self.delegate);

        let execution = tokio::task::spawn_blocking(move || {
            let mut status = move |msg: &str| {
                // The receiver only goes away if the connection already
                // failed; the delegate keeps running either way
                let _ = status_tx.send(msg.to_string());
            };
            delegate.execute(&options, &mut status)
        });

        // Each status line is written and flushed as it arrives, in
        // report order. recv() yields None once the delegate has returned
        // and its sender is dropped.
        while let Some(data) = status_rx.recv().await {
            write_message(&mut stream, &ServerMessage::Status { data }).await?;
        }

        let outcome = match execution.await {
            Ok(outcome) => outcome,
            Err(join_error) => Outcome::Failed(format!("execution panicked: {join_error}")),
        };

        match outcome {
            Outcome::Completed { persist } => {
                // Success needs no terminal message; a clean close is the
                // signal. A non-persist outcome makes this the last request.
                if !persist {
                    self.exit_pending = true;
                }
            }
            Outcome::Restart => {
                write_message(&mut stream, &ServerMessage::Restart).await?;
                self.exit_pending = true;
            }
            Outcome::Failed(message) => {
                let data = format!("\n\n{message}");
                write_message(&mut stream, &ServerMessage::Error { data }).await?;
                self.exit_pending = true;
            }
        }

        Ok(())
    }
}
