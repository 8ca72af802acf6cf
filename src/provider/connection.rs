//! The seam between the registry and a live provider.
//!
//! The registry only ever talks to `dyn ProviderConnection`; production code
//! plugs in [`ProcessConnector`](super::session::ProcessConnector), tests plug
//! in in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::ProviderError;
use super::types::{ProviderConfig, RemoteOutput, WireTool};
use crate::catalog::{InputSchema, ToolDescriptor};

/// A live, handshaken connection to one provider.
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    /// Ask the provider for its current tool set.
    async fn list_capabilities(&self, timeout: Duration) -> Result<Vec<ToolDescriptor>, ProviderError>;

    /// Invoke one tool and wait for exactly one correlated response.
    async fn call(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<RemoteOutput, ProviderError>;

    /// Liveness probe, distinct from a tool call.
    async fn ping(&self, timeout: Duration) -> Result<(), ProviderError>;

    /// Release every resource held by the connection. Idempotent.
    async fn stop(&self);
}

/// Opens connections from configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ProviderConfig) -> Result<Arc<dyn ProviderConnection>, ProviderError>;
}

/// Turn advertised wire tools into catalog descriptors owned by `provider`.
///
/// A schema that cannot be parsed is a protocol violation.
pub fn descriptors_from_wire(
    provider: &str,
    tools: Vec<WireTool>,
) -> Result<Vec<ToolDescriptor>, ProviderError> {
    tools
        .into_iter()
        .map(|tool| {
            let schema = InputSchema::from_json_schema(&tool.name, &tool.input_schema).map_err(|e| {
                ProviderError::Protocol {
                    name: provider.to_string(),
                    reason: e.to_string(),
                }
            })?;
            Ok(ToolDescriptor::remote(
                provider,
                &tool.name,
                tool.description.as_deref().unwrap_or_default(),
                schema,
            ))
        })
        .collect()
}
