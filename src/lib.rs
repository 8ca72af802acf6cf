//! Toolbridge: one invocation contract over in-process tools and
//! out-of-process tool servers.
//!
//! - [`catalog`]: the unified tool namespace with collision detection
//! - [`provider`]: stdio JSON-RPC sessions, the provider registry, health probes
//! - [`dispatcher`]: `invoke(name, args) -> InvocationResult`
//! - [`config`]: `toolbridge.yaml` loading
//! - [`logging`]: tracing subscriber setup
//!
//! ```no_run
//! use toolbridge::config::{find_config_path, load_config};
//! use toolbridge::Dispatcher;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = load_config(&find_config_path(&std::env::current_dir()?)?)?;
//! let dispatcher = Dispatcher::from_config(&config)?;
//! dispatcher.start_providers().await;
//! let result = dispatcher.invoke("multiply", serde_json::json!({"a": 2, "b": 3})).await;
//! println!("{}", serde_json::to_string(&result)?);
//! dispatcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod logging;
pub mod provider;

pub use catalog::{local_fn, local_sync_fn, CapabilityCatalog, InputSchema, LocalTool, ParamKind, ToolDescriptor};
pub use config::BridgeConfig;
pub use dispatcher::{Dispatcher, ErrorKind, InvocationResult, ToolCall};
pub use provider::{ConnectionState, ProviderConfig, ProviderError};
