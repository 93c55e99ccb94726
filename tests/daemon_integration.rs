//! Integration tests for the warm-kernel daemon.
//!
//! Each test runs a daemon in-process on its own temporary transport path
//! and drives it through `DaemonClient`, exactly the way the render
//! pipeline does.

use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{sleep, timeout};

use stoker::daemon::client::{DaemonClient, ExecutionReply};
use stoker::daemon::listener::ConnectionDescriptor;
use stoker::daemon::options::{ServeOptions, TransportKind};
use stoker::daemon::protocol::Command;
use stoker::daemon::server::run_server;
use stoker::execute::{ExecutionDelegate, Outcome};

/// Delegate that replays a fixed status script and outcome.
struct ScriptedDelegate {
    statuses: Vec<&'static str>,
    outcome: Outcome,
}

impl ScriptedDelegate {
    fn completed(persist: bool) -> Self {
        Self {
            statuses: vec![],
            outcome: Outcome::Completed { persist },
        }
    }

    fn with_statuses(statuses: Vec<&'static str>, outcome: Outcome) -> Self {
        Self { statuses, outcome }
    }
}

impl ExecutionDelegate for ScriptedDelegate {
    fn execute(&self, _options: &serde_json::Value, status: &mut dyn FnMut(&str)) -> Outcome {
        for message in &self.statuses {
            status(message);
        }
        self.outcome.clone()
    }
}

/// Delegate that panics mid-execution.
struct PanickyDelegate;

impl ExecutionDelegate for PanickyDelegate {
    fn execute(&self, _options: &serde_json::Value, _status: &mut dyn FnMut(&str)) -> Outcome {
        panic!("kernel fell over");
    }
}

fn network_options(dir: &TempDir, idle_timeout: Option<u64>) -> ServeOptions {
    ServeOptions {
        kind: TransportKind::Network,
        transport: dir.path().join("stoker.json"),
        timeout: idle_timeout,
        extra: serde_json::Map::new(),
    }
}

#[cfg(unix)]
fn local_options(dir: &TempDir) -> ServeOptions {
    ServeOptions {
        kind: TransportKind::Local,
        transport: dir.path().join("stoker.sock"),
        timeout: None,
        extra: serde_json::Map::new(),
    }
}

/// Spawn the server and wait until its descriptor is readable (network)
/// or its socket exists (local).
async fn start_server<D: ExecutionDelegate>(
    options: &ServeOptions,
    delegate: D,
) -> tokio::task::JoinHandle<stoker::Result<()>> {
    let handle = tokio::spawn(run_server(options.clone(), delegate));

    for _ in 0..200 {
        match options.kind {
            TransportKind::Network => {
                if ConnectionDescriptor::read(&options.transport).is_ok() {
                    return handle;
                }
            }
            TransportKind::Local => {
                if options.transport.exists() {
                    return handle;
                }
            }
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("daemon did not publish its transport in time");
}

#[tokio::test]
async fn descriptor_round_trip_reaches_the_daemon() {
    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, None);
    let server = start_server(
        &options,
        ScriptedDelegate::with_statuses(vec!["warm"], Outcome::Completed { persist: false }),
    )
    .await;

    // Connect exactly the way the pipeline would: read the artifact back
    let descriptor = ConnectionDescriptor::read(&options.transport).unwrap();
    assert!(!descriptor.secret.is_empty());

    let mut client = DaemonClient::connect_network(&descriptor).await.unwrap();
    let mut statuses = Vec::new();
    let reply = client
        .execute(serde_json::json!({}), |msg| statuses.push(msg.to_string()))
        .await
        .unwrap();

    assert_eq!(reply, ExecutionReply::Success);
    assert_eq!(statuses, vec!["warm"]);

    // persist=false: the daemon exits and removes its artifact
    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!options.transport.exists());
}

#[tokio::test]
async fn abort_closes_with_no_reply_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, None);
    let server = start_server(&options, ScriptedDelegate::completed(true)).await;

    let client = DaemonClient::connect(&options).await.unwrap();
    client.abort().await.unwrap();

    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!options.transport.exists());
}

#[tokio::test]
async fn invalid_secret_closes_silently_and_stops_the_daemon() {
    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, None);
    let server = start_server(&options, ScriptedDelegate::completed(true)).await;

    let descriptor = ConnectionDescriptor::read(&options.transport).unwrap();
    let mut client = DaemonClient::connect_network(&descriptor).await.unwrap();
    client
        .send_with_secret("not-the-secret", Command::Execute, serde_json::json!({}))
        .await
        .unwrap();

    // Auth failures never leak an error message: the connection just closes
    let reply = timeout(Duration::from_secs(5), client.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, None);

    // And the whole daemon exits, gracefully
    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!options.transport.exists());
}

#[tokio::test]
async fn restart_outcome_sends_one_restart_then_exits() {
    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, None);
    let server = start_server(
        &options,
        ScriptedDelegate::with_statuses(vec![], Outcome::Restart),
    )
    .await;

    let mut client = DaemonClient::connect(&options).await.unwrap();
    let reply = client
        .execute(serde_json::json!({}), |_| {})
        .await
        .unwrap();
    assert_eq!(reply, ExecutionReply::Restart);

    // Nothing follows the terminal message
    assert_eq!(client.next_message().await.unwrap(), None);

    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!options.transport.exists());
}

#[tokio::test]
async fn failure_outcome_reports_error_with_blank_prefix() {
    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, None);
    let server = start_server(
        &options,
        ScriptedDelegate::with_statuses(vec!["ran cell 1"], Outcome::Failed("boom".to_string())),
    )
    .await;

    let mut client = DaemonClient::connect(&options).await.unwrap();
    let mut statuses = Vec::new();
    let reply = client
        .execute(serde_json::json!({}), |msg| statuses.push(msg.to_string()))
        .await
        .unwrap();

    assert_eq!(statuses, vec!["ran cell 1"]);
    assert_eq!(reply, ExecutionReply::Failed("\n\nboom".to_string()));

    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn status_lines_arrive_in_report_order() {
    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, None);
    let server = start_server(
        &options,
        ScriptedDelegate::with_statuses(
            vec!["starting kernel", "running cells", "saving output"],
            Outcome::Completed { persist: false },
        ),
    )
    .await;

    let mut client = DaemonClient::connect(&options).await.unwrap();
    let mut statuses = Vec::new();
    let reply = client
        .execute(serde_json::json!({}), |msg| statuses.push(msg.to_string()))
        .await
        .unwrap();

    assert_eq!(reply, ExecutionReply::Success);
    assert_eq!(
        statuses,
        vec!["starting kernel", "running cells", "saving output"]
    );

    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn persistent_daemon_serves_repeated_requests() {
    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, None);
    let server = start_server(&options, ScriptedDelegate::completed(true)).await;

    // The warm path: one connection per render, same instance every time
    for _ in 0..3 {
        let mut client = DaemonClient::connect(&options).await.unwrap();
        let reply = client
            .execute(serde_json::json!({}), |_| {})
            .await
            .unwrap();
        assert_eq!(reply, ExecutionReply::Success);
    }

    let client = DaemonClient::connect(&options).await.unwrap();
    client.abort().await.unwrap();

    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn idle_timeout_shuts_the_daemon_down() {
    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, Some(1));
    let server = start_server(&options, ScriptedDelegate::completed(true)).await;

    // No client contact: the daemon exits on its own and cleans up
    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!options.transport.exists());
}

#[tokio::test]
async fn delegate_panic_is_reported_as_a_failure() {
    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, None);
    let server = start_server(&options, PanickyDelegate).await;

    let mut client = DaemonClient::connect(&options).await.unwrap();
    let reply = client
        .execute(serde_json::json!({}), |_| {})
        .await
        .unwrap();

    match reply {
        ExecutionReply::Failed(message) => assert!(message.contains("panicked")),
        other => panic!("expected a failure reply, got {other:?}"),
    }

    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn local_transport_round_trip() {
    let dir = TempDir::new().unwrap();
    let options = local_options(&dir);
    let server = start_server(
        &options,
        ScriptedDelegate::with_statuses(vec!["warm"], Outcome::Completed { persist: false }),
    )
    .await;

    // Local transport authenticates with the empty secret
    let mut client = DaemonClient::connect(&options).await.unwrap();
    let mut statuses = Vec::new();
    let reply = client
        .execute(serde_json::json!({}), |msg| statuses.push(msg.to_string()))
        .await
        .unwrap();

    assert_eq!(reply, ExecutionReply::Success);
    assert_eq!(statuses, vec!["warm"]);

    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!options.transport.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn local_transport_rejects_nonempty_secret() {
    let dir = TempDir::new().unwrap();
    let options = local_options(&dir);
    let server = start_server(&options, ScriptedDelegate::completed(true)).await;

    let mut client = DaemonClient::connect_local(&options.transport).await.unwrap();
    client
        .send_with_secret("anything", Command::Execute, serde_json::json!({}))
        .await
        .unwrap();

    let reply = timeout(Duration::from_secs(5), client.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, None);

    timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn malformed_request_is_fatal_for_the_daemon() {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    let dir = TempDir::new().unwrap();
    let options = network_options(&dir, None);
    let server = start_server(&options, ScriptedDelegate::completed(true)).await;

    let descriptor = ConnectionDescriptor::read(&options.transport).unwrap();
    let mut stream = TcpStream::connect(("127.0.0.1", descriptor.port))
        .await
        .unwrap();
    stream.write_all(b"this is not json\n").await.unwrap();
    stream.flush().await.unwrap();
    drop(stream);

    // Protocol errors escape the loop; cleanup still runs
    let result = timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_err());
    assert!(!options.transport.exists());
}
