//! Provider process lifecycle.
//!
//! Spawns a provider as a child process, performs the handshake, and owns the
//! child until `stop()`. Each provider runs as a separate OS process
//! communicating via JSON-RPC over stdio.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use super::connection::{descriptors_from_wire, Connector, ProviderConnection};
use super::errors::ProviderError;
use super::transport::{extract_result, StdioTransport};
use super::types::{InitializeResult, ListToolsResult, ProviderConfig, RemoteOutput, ServerInfo};
use crate::catalog::ToolDescriptor;
use crate::config::TimeoutSettings;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Protocol revision announced in `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Stderr lines kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for the stderr reader to drain after the process exits.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

// ─── TransportSession ────────────────────────────────────────────────────────

/// A running provider process with its transport.
pub struct TransportSession {
    name: String,
    transport: StdioTransport,
    child: tokio::sync::Mutex<Option<Child>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
    server_info: ServerInfo,
    shutdown_grace: Duration,
    stopped: AtomicBool,
}

impl TransportSession {
    /// Spawn the provider and complete the `initialize` handshake.
    ///
    /// The handshake is bounded by `timeouts.handshake`. On any failure the
    /// process is torn down and captured stderr is appended to the reason.
    pub async fn start(config: &ProviderConfig, timeouts: &TimeoutSettings) -> Result<Self, ProviderError> {
        let name = config.name.as_str();
        let connection_error = |reason: String| ProviderError::Connection {
            name: name.to_string(),
            reason,
        };

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        cmd.envs(&config.env);
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        // Wire stdio for JSON-RPC; stderr is captured for diagnostics.
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| connection_error(format!("failed to spawn '{}': {e}", config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| connection_error("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| connection_error("failed to capture stdout".into()))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(capture_stderr(name.to_string(), stderr, Arc::clone(&stderr_tail))));

        tracing::debug!(provider = name, pid = ?child.id(), command = %config.command, "spawned provider");

        let mut session = Self {
            name: name.to_string(),
            transport: StdioTransport::new(name, stdout, stdin),
            child: tokio::sync::Mutex::new(Some(child)),
            stderr_tail,
            stderr_task: Mutex::new(stderr_task),
            server_info: ServerInfo::default(),
            shutdown_grace: timeouts.shutdown_grace(),
            stopped: AtomicBool::new(false),
        };

        let handshake_timeout = timeouts.handshake();
        let outcome = tokio::time::timeout(handshake_timeout, session.handshake(handshake_timeout)).await;
        let failure = match outcome {
            Ok(Ok(info)) => {
                tracing::info!(
                    provider = name,
                    server = info.name.as_deref().unwrap_or("?"),
                    version = info.version.as_deref().unwrap_or("?"),
                    "provider handshake complete"
                );
                session.server_info = info;
                return Ok(session);
            }
            // The inner request shares the handshake deadline, so either one
            // firing is the same failure.
            Ok(Err(ProviderError::Timeout { .. })) | Err(_) => {
                format!("handshake timed out after {}ms", handshake_timeout.as_millis())
            }
            Ok(Err(e)) => format!("handshake failed: {e}"),
        };

        session.stop_with_grace(Duration::ZERO).await;
        let stderr = session.stderr_snapshot();
        if !stderr.is_empty() {
            tracing::warn!(provider = name, stderr = %stderr, "provider stderr captured on failure");
        }
        Err(connection_error(format!("{failure}{}", format_stderr_suffix(&stderr))))
    }

    /// Server identity reported by `initialize`.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// The last few lines the provider wrote to stderr.
    pub fn stderr_snapshot(&self) -> String {
        self.stderr_tail
            .lock()
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn handshake(&self, timeout: Duration) -> Result<ServerInfo, ProviderError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": { "name": "toolbridge", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": {},
        });
        let response = self.transport.request("initialize", Some(params), timeout).await?;
        let result = extract_result(response)?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| ProviderError::Protocol {
            name: self.name.clone(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

        self.transport.notify("notifications/initialized", None).await?;
        Ok(init.server_info.unwrap_or_default())
    }

    async fn stop_with_grace(&self, grace: Duration) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Best-effort shutdown notification, then EOF on stdin.
        if !grace.is_zero() {
            if let Ok(Err(e)) = tokio::time::timeout(grace, self.transport.notify("shutdown", None)).await {
                tracing::debug!(provider = %self.name, error = %e, "shutdown notification not delivered");
            }
        }
        self.transport.close_writer().await;

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(provider = %self.name, %status, "provider exited");
                }
                _ => {
                    if !grace.is_zero() {
                        tracing::warn!(provider = %self.name, "provider did not exit in time; killing");
                    }
                    if let Err(e) = child.kill().await {
                        tracing::warn!(provider = %self.name, error = %e, "failed to kill provider");
                    }
                }
            }
        }

        self.transport.close();

        let task = self.stderr_task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }
    }

    fn closed_error(&self, method: &str) -> ProviderError {
        ProviderError::Transport {
            name: self.name.clone(),
            reason: format!("session stopped before '{method}'"),
        }
    }
}

#[async_trait]
impl ProviderConnection for TransportSession {
    async fn list_capabilities(&self, timeout: Duration) -> Result<Vec<ToolDescriptor>, ProviderError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(self.closed_error("tools/list"));
        }
        let response = self.transport.request("tools/list", Some(json!({})), timeout).await?;
        let result = extract_result(response)?;
        let listed: ListToolsResult = serde_json::from_value(result).map_err(|e| ProviderError::Protocol {
            name: self.name.clone(),
            reason: format!("malformed tools/list response: {e}"),
        })?;
        descriptors_from_wire(&self.name, listed.tools)
    }

    async fn call(&self, tool: &str, arguments: Value, timeout: Duration) -> Result<RemoteOutput, ProviderError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(self.closed_error("tools/call"));
        }
        let params = json!({ "name": tool, "arguments": arguments });
        let response = self.transport.request("tools/call", Some(params), timeout).await?;
        let result = extract_result(response)?;
        serde_json::from_value(result).map_err(|e| ProviderError::Protocol {
            name: self.name.clone(),
            reason: format!("malformed tools/call response for '{tool}': {e}"),
        })
    }

    async fn ping(&self, timeout: Duration) -> Result<(), ProviderError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(self.closed_error("ping"));
        }
        let response = self.transport.request("ping", None, timeout).await?;
        extract_result(response).map(|_| ())
    }

    async fn stop(&self) {
        self.stop_with_grace(self.shutdown_grace).await;
    }
}

// ─── Connector ───────────────────────────────────────────────────────────────

/// Launches providers as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessConnector {
    timeouts: TimeoutSettings,
}

impl ProcessConnector {
    pub fn new(timeouts: TimeoutSettings) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(&self, config: &ProviderConfig) -> Result<Arc<dyn ProviderConnection>, ProviderError> {
        let session = TransportSession::start(config, &self.timeouts).await?;
        Ok(Arc::new(session))
    }
}

// ─── Stderr Capture ──────────────────────────────────────────────────────────

/// Keep the tail of a provider's stderr and mirror it to the log.
async fn capture_stderr(provider: String, stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(provider = %provider, "stderr: {line}");
        let mut buf = tail.lock();
        if buf.len() == STDERR_TAIL_LINES {
            buf.pop_front();
        }
        buf.push_back(line);
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let mut text = trimmed.to_string();
    if text.len() > 2000 {
        let mut cut = 2000;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...(truncated)");
    }
    format!(" | stderr: {text}")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_timeouts() -> TimeoutSettings {
        TimeoutSettings {
            handshake_ms: 2_000,
            call_ms: 2_000,
            local_ms: 2_000,
            shutdown_grace_ms: 200,
        }
    }

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix("  \n"), "");
        assert_eq!(format_stderr_suffix("boom\n"), " | stderr: boom");
        let long = "x".repeat(3000);
        assert!(format_stderr_suffix(&long).ends_with("...(truncated)"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let config = ProviderConfig::new("ghost", "/definitely/not/a/real/binary");
        let err = TransportSession::start(&config, &fast_timeouts()).await.err().unwrap();
        match err {
            ProviderError::Connection { name, reason } => {
                assert_eq!(name, "ghost");
                assert!(reason.contains("failed to spawn"));
            }
            other => panic!("expected Connection, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_failure_carries_stderr() {
        let config = ProviderConfig::new("noisy", "sh").args(["-c", "echo 'module not found' >&2; exit 1"]);
        let err = TransportSession::start(&config, &fast_timeouts()).await.err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("handshake failed"), "{msg}");
        assert!(msg.contains("module not found"), "{msg}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_timeout() {
        let config = ProviderConfig::new("sleepy", "sleep").args(["30"]);
        let timeouts = TimeoutSettings {
            handshake_ms: 150,
            ..fast_timeouts()
        };
        let started = std::time::Instant::now();
        let err = TransportSession::start(&config, &timeouts).await.err().unwrap();
        assert!(matches!(err, ProviderError::Connection { ref name, .. } if name == "sleepy"));
        assert!(err.to_string().contains("handshake timed out after 150ms"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
