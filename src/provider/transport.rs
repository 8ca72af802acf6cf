//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with provider processes:
//! - Writing JSON-RPC requests and notifications, one JSON object per line
//! - A background reader that routes each response to its waiting caller
//! - Deadlines on every request
//!
//! The transport is generic over `AsyncRead`/`AsyncWrite` so tests can drive
//! it with in-memory pipes instead of a child process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::ProviderError;
use super::types::{error_codes, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type PendingMap = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Bi-directional JSON-RPC transport over a provider's stdio.
pub struct StdioTransport {
    provider: String,
    /// `tokio::sync::Mutex` is FIFO, so writes leave in submission order.
    writer: Mutex<Option<BoxedWriter>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Create a transport and start its background reader.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<R, W>(provider: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(read_loop(
            provider.to_string(),
            BufReader::new(reader),
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Self {
            provider: provider.to_string(),
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
            closed,
            reader_task: parking_lot::Mutex::new(Some(task)),
        }
    }

    /// Whether the read side has ended (EOF, read error, or `close`).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// The whole exchange (write + wait) is bounded by `timeout`. On expiry
    /// the pending entry is released and a late response is discarded.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, ProviderError> {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();

        {
            // Checked under the pending lock so a concurrent EOF cannot slip
            // between the check and the insert.
            let mut pending = self.pending.lock();
            if self.is_closed() {
                return Err(self.closed_error());
            }
            pending.insert(id, tx);
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let req = JsonRpcRequest::new(id, method, params);
        let exchange = async {
            self.write_line(&req).await?;
            rx.await.map_err(|_| self.closed_error())
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(provider = %self.provider, method, id, "request timed out");
                Err(ProviderError::Timeout {
                    name: self.provider.clone(),
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ProviderError> {
        self.write_line(&JsonRpcNotification::new(method, params)).await
    }

    /// Shut down the write side. The provider sees EOF on its stdin.
    pub async fn close_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(provider = %self.provider, error = %e, "error closing provider stdin");
            }
        }
    }

    /// Stop the reader and fail every pending request.
    pub fn close(&self) {
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        let mut pending = self.pending.lock();
        self.closed.store(true, Ordering::SeqCst);
        pending.clear();
    }

    async fn write_line<T: Serialize>(&self, message: &T) -> Result<(), ProviderError> {
        let mut json = serde_json::to_string(message).map_err(|e| ProviderError::Transport {
            name: self.provider.clone(),
            reason: format!("failed to serialize message: {e}"),
        })?;
        json.push('\n');

        let mut write = WriteInProgress {
            writer: self.writer.lock().await,
            provider: &self.provider,
            done: false,
        };
        let writer = write.writer.as_mut().ok_or_else(|| ProviderError::Transport {
            name: self.provider.clone(),
            reason: "provider stdin is closed".into(),
        })?;

        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| ProviderError::Transport {
                name: self.provider.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| ProviderError::Transport {
            name: self.provider.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })?;
        write.done = true;
        Ok(())
    }

    fn closed_error(&self) -> ProviderError {
        ProviderError::Transport {
            name: self.provider.clone(),
            reason: "provider stdout closed (process may have exited)".into(),
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Releases a pending entry however the request ends.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Holds the writer for one message. If the write does not finish (the
/// caller's deadline fired or the pipe broke) the writer is dropped, so no
/// later message is appended to a partial line.
struct WriteInProgress<'a> {
    writer: tokio::sync::MutexGuard<'a, Option<BoxedWriter>>,
    provider: &'a str,
    done: bool,
}

impl Drop for WriteInProgress<'_> {
    fn drop(&mut self) {
        if !self.done && self.writer.take().is_some() {
            tracing::warn!(provider = %self.provider, "write to provider interrupted; closing its stdin");
        }
    }
}

async fn read_loop<R>(
    provider: String,
    reader: BufReader<R>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                // Anything that isn't a JSON-RPC message is provider log output.
                let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(trimmed) else {
                    tracing::trace!(provider = %provider, line = trimmed, "skipping non-JSON line");
                    continue;
                };

                if let Some(method) = &resp.method {
                    tracing::trace!(provider = %provider, method, "ignoring provider-initiated message");
                    continue;
                }

                let Some(id) = resp.id else {
                    tracing::debug!(provider = %provider, "response without id");
                    continue;
                };

                let waiter = pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => {
                        tracing::debug!(provider = %provider, id, "response for unknown or expired request");
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(provider = %provider, "provider stdout reached EOF");
                break;
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "failed to read provider stdout");
                break;
            }
        }
    }

    // Dropping the senders wakes every waiter with a closed-channel error.
    let mut pending = pending.lock();
    closed.store(true, Ordering::SeqCst);
    pending.clear();
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `ProviderError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<Value, ProviderError> {
    if let Some(err) = response.error {
        return Err(ProviderError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(ProviderError::Remote {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
