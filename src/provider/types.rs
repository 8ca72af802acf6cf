//! Shared types for provider sessions.
//!
//! JSON-RPC 2.0 message types, the provider wire payloads, and the session
//! state machine.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// `method` is only captured so server-initiated requests and notifications
/// can be told apart from responses.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub method: Option<String>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ─── Wire Payloads ───────────────────────────────────────────────────────────

/// Server info returned in the `initialize` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// `initialize` response payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub capabilities: Value,
}

/// One tool as advertised by `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: Value,
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<WireTool>,
}

/// Raw `tools/call` result before normalization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteOutput {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default, alias = "isError")]
    pub is_error: bool,
    #[serde(default, alias = "structuredContent")]
    pub structured_content: Option<Value>,
}

impl RemoteOutput {
    /// A single text block, as most providers answer.
    pub fn text(text: &str) -> Self {
        Self {
            content: vec![serde_json::json!({ "type": "text", "text": text })],
            ..Self::default()
        }
    }
}

// ─── ProviderConfig ──────────────────────────────────────────────────────────

/// How to launch one provider process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub enabled: bool,
    /// Tools the provider is expected to expose before it has been reached.
    pub declared_tools: Vec<String>,
}

impl ProviderConfig {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            enabled: true,
            declared_tools: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn declared_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared_tools = names.into_iter().map(Into::into).collect();
        self
    }
}

// ─── Session State ───────────────────────────────────────────────────────────

/// Lifecycle state of one provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl ConnectionState {
    /// Whether the state machine allows `self → next`.
    ///
    /// Disconnected→Connecting→Ready, Ready⇄Degraded, and anything (except
    /// Closed itself) → Closed. Closed is terminal.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Ready)
                | (Ready, Degraded)
                | (Degraded, Ready)
                | (Disconnected | Connecting | Ready | Degraded, Closed)
        )
    }

    /// Ready or Degraded: tool calls may be forwarded.
    pub fn is_callable(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Health Reporting ────────────────────────────────────────────────────────

/// One observed state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthTransition {
    pub provider: String,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Point-in-time health of one provider, as returned by `get_health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub session_id: Uuid,
    pub state: ConnectionState,
    pub enabled: bool,
    pub tool_count: usize,
    pub last_healthy_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub restarts: u32,
    pub last_error: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
