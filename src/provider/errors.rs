//! Provider error types.

use thiserror::Error;

use super::types::ConnectionState;
use crate::catalog::CatalogError;
use crate::config::ConfigError;

/// Errors raised by provider sessions and the provider registry.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A provider with this name is already registered.
    #[error("provider '{name}' is already registered")]
    DuplicateProvider { name: String },

    /// No provider with this name is registered.
    #[error("unknown provider: '{name}'")]
    UnknownProvider { name: String },

    /// The provider could not be brought to Ready.
    #[error("provider '{name}' failed to start: {reason}")]
    ProviderStartup { name: String, reason: String },

    /// Spawn failure, handshake failure, or handshake timeout.
    #[error("connection to provider '{name}' failed: {reason}")]
    Connection { name: String, reason: String },

    /// The provider sent something that does not follow the wire contract.
    #[error("protocol error from provider '{name}': {reason}")]
    Protocol { name: String, reason: String },

    /// The pipe broke or the process exited.
    #[error("transport error for provider '{name}': {reason}")]
    Transport { name: String, reason: String },

    /// No response arrived within the deadline.
    #[error("'{method}' on provider '{name}' timed out after {timeout_ms}ms")]
    Timeout {
        name: String,
        method: String,
        timeout_ms: u64,
    },

    /// The provider answered with a JSON-RPC error object.
    #[error("provider error [{code}]: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A session state change that the state machine forbids.
    #[error("provider '{name}' cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: ConnectionState,
        to: ConnectionState,
    },

    /// The provider has no live connection.
    #[error("provider '{name}' is not connected (state: {state})")]
    NotConnected { name: String, state: ConnectionState },

    /// Registering discovered tools failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The settings handed to the dispatcher are unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolOrigin;

    #[test]
    fn test_catalog_error_passes_through() {
        let err: ProviderError = CatalogError::NameCollision {
            name: "search".into(),
            existing: ToolOrigin::provider("a"),
            attempted: ToolOrigin::provider("b"),
        }
        .into();
        assert!(err.to_string().starts_with("tool name 'search'"));
    }

    #[test]
    fn test_timeout_message() {
        let err = ProviderError::Timeout {
            name: "calc".into(),
            method: "tools/call".into(),
            timeout_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "'tools/call' on provider 'calc' timed out after 250ms"
        );
    }
}
