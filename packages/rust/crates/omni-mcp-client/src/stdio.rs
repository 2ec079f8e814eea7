//! Child-process transport: newline-delimited JSON over stdin/stdout.
//!
//! stderr is piped (never inherited) and exposed through
//! [`MessageTransport::take_diagnostics`] so the bridge can forward it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport::{CloseSignal, JsonRpcMessage, MessageTransport, TransportCore};

const STDERR_CHUNK_BYTES: usize = 8 * 1024;

/// What to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioConfig {
    /// Executable name or path.
    pub command: String,
    /// Arguments, already tokenized.
    pub args: Vec<String>,
    /// Complete child environment (the child does not inherit anything else).
    pub env: BTreeMap<String, String>,
}

impl StdioConfig {
    /// Resolve `command` against the `PATH` of the child environment, without
    /// a shell. Unresolvable names are returned unchanged so the spawn error
    /// reports them.
    #[must_use]
    pub fn resolve_program(&self) -> PathBuf {
        let search_path = self
            .env
            .get("PATH")
            .cloned()
            .or_else(|| std::env::var("PATH").ok());
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        match which::which_in(&self.command, search_path, cwd) {
            Ok(path) => path,
            Err(_) => PathBuf::from(&self.command),
        }
    }
}

/// MCP server running as a child process.
pub struct StdioClientTransport {
    config: StdioConfig,
    core: Arc<TransportCore>,
    started: AtomicBool,
    stdin: Mutex<Option<ChildStdin>>,
    diagnostics: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl StdioClientTransport {
    #[must_use]
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            core: Arc::new(TransportCore::new()),
            started: AtomicBool::new(false),
            stdin: Mutex::new(None),
            diagnostics: std::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StdioConfig {
        &self.config
    }
}

#[async_trait]
impl MessageTransport for StdioClientTransport {
    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        self.core.ensure_open()?;

        let program = self.config.resolve_program();
        let mut cmd = Command::new(&program);
        cmd.args(&self.config.args)
            .env_clear()
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;

        let pipe_missing = |name: &str| TransportError::Protocol(format!("child {name} not piped"));
        let stdin = child.stdin.take().ok_or_else(|| pipe_missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| pipe_missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| pipe_missing("stderr"))?;

        tracing::info!(
            event = "mcp.client.stdio.spawned",
            command = %program.display(),
            args = ?self.config.args,
            pid = child.id(),
            "spawned stdio transport"
        );

        *self.stdin.lock().await = Some(stdin);
        let (diagnostics_tx, diagnostics_rx) = mpsc::unbounded_channel();
        *self
            .diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(diagnostics_rx);

        let cancel = self.core.cancellation();
        tokio::spawn(read_stdout(Arc::clone(&self.core), stdout));
        tokio::spawn(read_stderr(stderr, diagnostics_tx, cancel.clone()));
        tokio::spawn(supervise(child, cancel));
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        self.core.ensure_open()?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::NotStarted)?;
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        if let Err(error) = write_line(stdin, &line).await {
            guard.take();
            self.core.finish(Some(error.to_string()));
            return Err(error.into());
        }
        Ok(())
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        self.core.take_inbound()
    }

    fn closed(&self) -> CloseSignal {
        self.core.closed()
    }

    async fn close(&self) {
        self.stdin.lock().await.take();
        if self.core.finish(None) {
            tracing::debug!(event = "mcp.client.stdio.closed", command = %self.config.command);
        }
    }

    fn take_diagnostics(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &[u8]) -> std::io::Result<()> {
    stdin.write_all(line).await?;
    stdin.flush().await
}

/// One JSON-RPC message per line. EOF closes the transport, after every
/// complete line has been delivered.
async fn read_stdout(core: Arc<TransportCore>, stdout: ChildStdout) {
    let cancel = core.cancellation();
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = lines.next_line() => next,
        };
        match next {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(message) => {
                        if !core.deliver(message) {
                            return;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            event = "mcp.client.stdio.invalid_message",
                            error = %error,
                            "ignoring non-JSON line on child stdout"
                        );
                    }
                }
            }
            Ok(None) => {
                core.finish(None);
                return;
            }
            Err(error) => {
                core.finish(Some(format!("read child stdout: {error}")));
                return;
            }
        }
    }
}

async fn read_stderr(
    mut stderr: ChildStderr,
    diagnostics: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; STDERR_CHUNK_BYTES];
    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => return,
            read = stderr.read(&mut buf) => read,
        };
        match read {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                // Nobody listening is fine; the text is still drained.
                let _ = diagnostics.send(chunk);
            }
        }
    }
}

/// Kill the child when the transport closes; log its exit otherwise.
async fn supervise(mut child: Child, cancel: CancellationToken) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => tracing::info!(
                event = "mcp.client.stdio.exited",
                status = %status,
                "stdio child exited"
            ),
            Err(error) => tracing::warn!(
                event = "mcp.client.stdio.wait_failed",
                error = %error,
                "waiting for stdio child failed"
            ),
        },
        () = cancel.cancelled() => {
            if let Err(error) = child.kill().await {
                tracing::debug!(event = "mcp.client.stdio.kill_failed", error = %error);
            }
        }
    }
}
