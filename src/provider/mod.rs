//! Providers: out-of-process tool servers reached over JSON-RPC on stdio.
//!
//! This module handles:
//! - Spawning provider processes and the `initialize` handshake
//! - Request/response correlation over line-delimited JSON-RPC 2.0
//! - The per-provider session state machine and registry
//! - Periodic health probes with bounded auto-restart

pub mod connection;
pub mod errors;
pub mod health;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use connection::{Connector, ProviderConnection};
pub use errors::ProviderError;
pub use health::{HealthMonitor, HealthMonitorHandle};
pub use registry::{LiveConnection, ProviderRegistry, SessionRecord};
pub use session::{ProcessConnector, TransportSession};
pub use transport::StdioTransport;
pub use types::{ConnectionState, HealthTransition, ProviderConfig, ProviderHealth, RemoteOutput};
