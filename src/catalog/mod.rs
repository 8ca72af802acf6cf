//! Capability Catalog: one namespace over local and provider tools.
//!
//! This module handles:
//! - Tool descriptors and their parsed input schemas
//! - In-process tool handlers
//! - Name → origin resolution with collision detection
//! - Atomic per-provider refresh and removal

pub mod errors;
pub mod index;
pub mod local;
pub mod types;

// Re-exports for convenience
pub use errors::CatalogError;
pub use index::{CapabilityCatalog, ProviderRegistration, Registration, ResolvedTool, ToolRoute};
pub use local::{local_fn, local_sync_fn, LocalHandler, LocalTool};
pub use types::{InputSchema, InputSchemaBuilder, ParamKind, ParamSpec, ToolDescriptor, ToolOrigin, ToolSummary};
