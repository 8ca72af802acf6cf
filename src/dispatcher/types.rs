//! Invocation envelope returned for every tool call.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a call failed. Stable across local and provider tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No tool with that name is registered.
    NotFound,
    /// Arguments do not satisfy the tool's input schema.
    InvalidArguments,
    /// A local handler returned an error or panicked.
    LocalExecutionError,
    /// The owning provider could not be reached.
    ProviderUnavailable,
    /// The provider ran the tool and reported failure.
    RemoteExecutionError,
    /// No answer within the deadline.
    Timeout,
    /// The provider answered with something unparseable.
    ProtocolError,
}

impl ErrorKind {
    /// Transient failures where the same call may succeed later.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::ProviderUnavailable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidArguments => "invalid_arguments",
            Self::LocalExecutionError => "local_execution_error",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::RemoteExecutionError => "remote_execution_error",
            Self::Timeout => "timeout",
            Self::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized payload of a successful call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub value: Value,
}

impl ToolOutput {
    /// Render for a chat transcript: strings verbatim, everything else as JSON.
    pub fn as_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl InvocationFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Exactly one of success or failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "payload", rename_all = "snake_case")]
pub enum InvocationResult {
    Success(ToolOutput),
    Failure(InvocationFailure),
}

impl InvocationResult {
    pub fn success(value: Value) -> Self {
        Self::Success(ToolOutput { value })
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure(InvocationFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(out) => Some(&out.value),
            Self::Failure(_) => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(f.kind),
        }
    }

    pub fn into_result(self) -> Result<Value, InvocationFailure> {
        match self {
            Self::Success(out) => Ok(out.value),
            Self::Failure(f) => Err(f),
        }
    }
}

/// One entry of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: &str, arguments: Value) -> Self {
        Self {
            name: name.to_string(),
            arguments,
        }
    }
}
