//! Per-connection bridge: one WebSocket peer, one spawned language server.
//!
//! Child stdout flows through a [`FrameBuffer`] and each complete payload is
//! forwarded verbatim as one WebSocket text message; inbound text messages
//! are re-framed with a `Content-Length` header and written to child stdin.
//! Either side dying tears the whole connection down.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sketchbridge_framing::FrameBuffer;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use crate::command::split_command_line;
use crate::config::{BridgeConfig, LAUNCH_COMMAND_ENV};

/// Application close codes, one per error class. All in the private-use
/// range, never the normal 1000.
pub(crate) const CLOSE_CONFIG_MISSING: u16 = 4001;
pub(crate) const CLOSE_SPAWN_FAILED: u16 = 4002;
pub(crate) const CLOSE_CHILD_EXITED: u16 = 4003;
pub(crate) const CLOSE_STDIN_WRITE_FAILED: u16 = 4004;

const PAYLOAD_CHANNEL_CAPACITY: usize = 64;

const STDOUT_READ_BUFFER: usize = 8 * 1024;

/// Per-connection failures that close the socket with an explicit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum BridgeError {
    #[error("{LAUNCH_COMMAND_ENV} is not configured")]
    LaunchCommandMissing,
    #[error("language server launch command is empty")]
    LaunchCommandEmpty,
    #[error("cannot start language server: {0}")]
    Spawn(String),
    #[error("language server exited: {0}")]
    ChildExited(String),
    #[error("language server stdin write failed: {0}")]
    StdinWrite(String),
}

impl BridgeError {
    pub(crate) fn close_code(&self) -> u16 {
        match self {
            Self::LaunchCommandMissing | Self::LaunchCommandEmpty => CLOSE_CONFIG_MISSING,
            Self::Spawn(_) => CLOSE_SPAWN_FAILED,
            Self::ChildExited(_) => CLOSE_CHILD_EXITED,
            Self::StdinWrite(_) => CLOSE_STDIN_WRITE_FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BridgeState {
    Idle,
    Spawning,
    Running,
    Terminated,
}

impl BridgeState {
    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Terminated => "terminated",
        }
    }
}

fn advance(state: &mut BridgeState, next: BridgeState) {
    tracing::debug!(from = state.label(), to = next.label(), "bridge state");
    *state = next;
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspQuery {
    /// Working directory for the language server; the service's own working
    /// directory is used when absent.
    pub project: Option<String>,
}

pub(crate) async fn lsp_websocket(
    ws: WebSocketUpgrade,
    State(config): State<Arc<BridgeConfig>>,
    Query(query): Query<LspQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, config, query.project))
}

/// Resolve the launch configuration into an argv, without spawning anything.
pub(crate) fn plan_launch(config: &BridgeConfig) -> Result<(String, Vec<String>), BridgeError> {
    let Some(command_line) = config.launch_command.as_deref() else {
        return Err(BridgeError::LaunchCommandMissing);
    };
    let mut parts = split_command_line(command_line);
    if parts.is_empty() {
        return Err(BridgeError::LaunchCommandEmpty);
    }
    let executable = parts.remove(0);
    Ok((executable, parts))
}

fn spawn_language_server(
    executable: &str,
    args: &[String],
    project: Option<&str>,
) -> Result<Child> {
    let resolved =
        which::which(executable).with_context(|| format!("{executable} not found in PATH"))?;

    let mut cmd = Command::new(&resolved);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = project {
        cmd.current_dir(dir);
    }
    cmd.spawn().with_context(|| format!("spawning {executable}"))
}

pub(crate) async fn handle_connection(
    socket: WebSocket,
    config: Arc<BridgeConfig>,
    project: Option<String>,
) {
    let mut state = BridgeState::Idle;

    let (executable, args) = match plan_launch(&config) {
        Ok(parts) => parts,
        Err(err) => {
            reject(socket, &err).await;
            return;
        }
    };

    advance(&mut state, BridgeState::Spawning);
    let mut child = match spawn_language_server(&executable, &args, project.as_deref()) {
        Ok(child) => child,
        Err(e) => {
            reject(socket, &BridgeError::Spawn(format!("{e:#}"))).await;
            return;
        }
    };

    // All three handles exist by construction: the spawn pipes each of them.
    let (Some(stdout), Some(mut stdin), Some(stderr)) =
        (child.stdout.take(), child.stdin.take(), child.stderr.take())
    else {
        reject(
            socket,
            &BridgeError::Spawn("language server stdio unavailable".to_string()),
        )
        .await;
        kill_child(&mut child).await;
        return;
    };

    advance(&mut state, BridgeState::Running);
    tracing::info!(%executable, project = project.as_deref(), "language server started");

    let (payload_tx, mut payload_rx) = mpsc::channel::<String>(PAYLOAD_CHANNEL_CAPACITY);
    let stdout_task = tokio::spawn(pump_child_stdout(stdout, payload_tx));
    let stderr_task = tokio::spawn(log_child_stderr(stderr));

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut stdout_done = false;

    let close: Option<BridgeError> = loop {
        tokio::select! {
            payload = payload_rx.recv(), if !stdout_done => {
                match payload {
                    Some(text) => {
                        if let Err(e) = ws_sender.send(Message::Text(text)).await {
                            // Peer may be gone mid-flight; the receive side
                            // will observe the close shortly.
                            tracing::warn!("websocket send failed: {e}");
                        }
                    }
                    None => stdout_done = true,
                }
            }
            status = child.wait() => {
                break Some(BridgeError::ChildExited(describe_exit(&status)));
            }
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let frame = sketchbridge_framing::encode(&text);
                        if let Err(e) = write_to_child(&mut stdin, &frame).await {
                            break Some(BridgeError::StdinWrite(e.to_string()));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(other)) => {
                        tracing::trace!(?other, "ignoring non-text websocket message");
                    }
                    Some(Err(e)) => {
                        tracing::warn!("websocket receive failed: {e}");
                        break None;
                    }
                }
            }
        }
    };

    advance(&mut state, BridgeState::Terminated);
    kill_child(&mut child).await;

    // Forward whatever the framer completed before the teardown trigger.
    while let Ok(text) = payload_rx.try_recv() {
        let _ = ws_sender.send(Message::Text(text)).await;
    }
    stdout_task.abort();
    stderr_task.abort();

    if let Some(err) = close {
        let code = err.close_code();
        let reason = err.to_string();
        tracing::info!(code, %reason, "closing websocket");
        let _ = ws_sender
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    }
}

/// Close the socket before any child exists.
async fn reject(mut socket: WebSocket, err: &BridgeError) {
    tracing::warn!(code = err.close_code(), reason = %err, "rejecting lsp connection");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: err.close_code(),
            reason: err.to_string().into(),
        })))
        .await;
}

/// Kill the child. Safe on every teardown path, repeatedly: killing an
/// already-dead process reports an error that is deliberately swallowed.
async fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!("language server kill: {e}");
    }
}

async fn write_to_child(stdin: &mut ChildStdin, frame: &[u8]) -> std::io::Result<()> {
    stdin.write_all(frame).await?;
    stdin.flush().await
}

/// Read child stdout chunks, reassemble frames, emit one payload per message.
pub(crate) async fn pump_child_stdout<R>(mut stdout: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut framer = FrameBuffer::new();
    let mut buf = [0u8; STDOUT_READ_BUFFER];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for payload in framer.feed(&buf[..n]) {
                    if tx.send(payload).await.is_err() {
                        return; // connection already torn down
                    }
                }
            }
            Err(e) => {
                tracing::warn!("reading language server stdout: {e}");
                break;
            }
        }
    }
}

/// Child stderr goes to diagnostic logging only, never to the peer.
pub(crate) async fn log_child_stderr<R>(stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(target: "sketchbridge::lsp_stderr", "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("reading language server stderr: {e}");
                break;
            }
        }
    }
}

fn describe_exit(status: &std::io::Result<std::process::ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn config_with(launch_command: Option<&str>) -> BridgeConfig {
        BridgeConfig {
            launch_command: launch_command.map(String::from),
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }

    #[test]
    fn test_close_codes_are_distinct_and_nonstandard() {
        let codes = [
            CLOSE_CONFIG_MISSING,
            CLOSE_SPAWN_FAILED,
            CLOSE_CHILD_EXITED,
            CLOSE_STDIN_WRITE_FAILED,
        ];
        for (i, code) in codes.iter().enumerate() {
            assert_ne!(*code, 1000, "application codes never reuse normal close");
            assert!((4000..5000).contains(code), "private-use range");
            assert!(!codes[..i].contains(code), "codes must be distinct");
        }
    }

    #[test]
    fn test_plan_launch_missing_config_rejects_without_spawning() {
        let err = plan_launch(&config_with(None)).unwrap_err();
        assert!(matches!(err, BridgeError::LaunchCommandMissing));
        assert_eq!(err.close_code(), CLOSE_CONFIG_MISSING);
    }

    #[test]
    fn test_plan_launch_blank_command_rejects() {
        let err = plan_launch(&config_with(Some("   "))).unwrap_err();
        assert!(matches!(err, BridgeError::LaunchCommandEmpty));
        assert_eq!(err.close_code(), CLOSE_CONFIG_MISSING);
    }

    #[test]
    fn test_plan_launch_splits_quoted_arguments() {
        let (executable, args) = plan_launch(&config_with(Some(
            r#"arduino-language-server -cli "C:\Program Files\arduino-cli.exe""#,
        )))
        .unwrap();
        assert_eq!(executable, "arduino-language-server");
        assert_eq!(args, vec!["-cli", r"C:\Program Files\arduino-cli.exe"]);
    }

    #[test]
    fn test_error_to_close_code_mapping() {
        assert_eq!(
            BridgeError::Spawn("x".into()).close_code(),
            CLOSE_SPAWN_FAILED
        );
        assert_eq!(
            BridgeError::ChildExited("exit status: 1".into()).close_code(),
            CLOSE_CHILD_EXITED
        );
        assert_eq!(
            BridgeError::StdinWrite("broken pipe".into()).close_code(),
            CLOSE_STDIN_WRITE_FAILED
        );
    }

    #[test]
    fn test_describe_exit_wait_failure() {
        let err = std::io::Error::other("no child");
        assert!(describe_exit(&Err(err)).contains("wait failed"));
    }

    #[tokio::test]
    async fn test_pump_stdout_reassembles_split_frames() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::channel(8);
        let pump = tokio::spawn(pump_child_stdout(reader, tx));

        let first = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let second = r#"{"jsonrpc":"2.0","method":"textDocument/publishDiagnostics"}"#;
        let mut bytes = sketchbridge_framing::encode(first);
        bytes.extend_from_slice(&sketchbridge_framing::encode(second));

        // Deliver in chunks that straddle header and body boundaries.
        for chunk in bytes.chunks(7) {
            writer.write_all(chunk).await.unwrap();
        }
        drop(writer);

        assert_eq!(rx.recv().await.unwrap(), first);
        assert_eq!(rx.recv().await.unwrap(), second);
        assert!(rx.recv().await.is_none(), "pump ends on EOF");
        pump.await.unwrap();
    }

    #[test]
    fn test_spawn_unknown_executable_fails() {
        let result = spawn_language_server("sketchbridge-no-such-binary", &[], None);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_round_trip_and_idempotent_kill() {
        // `cat` echoes its framed stdin back on stdout, standing in for a
        // language server that answers immediately.
        let mut child = spawn_language_server("cat", &[], None).expect("cat should spawn");
        let stdout = child.stdout.take().unwrap();
        let mut stdin = child.stdin.take().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let pump = tokio::spawn(pump_child_stdout(stdout, tx));

        let payload = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        write_to_child(&mut stdin, &sketchbridge_framing::encode(payload))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), payload);

        kill_child(&mut child).await;
        kill_child(&mut child).await; // second kill must be a no-op
        let _ = child.wait().await;
        pump.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_uses_project_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let child = spawn_language_server("pwd", &[], Some(dir.path().to_str().unwrap()))
            .expect("pwd should spawn");

        let output = child.wait_with_output().await.unwrap();
        let reported = std::path::PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
