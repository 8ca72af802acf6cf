//! Caller-facing invocation API.
//!
//! `Dispatcher` resolves a tool name through the capability catalog, runs
//! it locally or on its provider, and returns an `InvocationResult`.

pub mod normalize;
pub mod router;
pub mod types;

pub use normalize::{normalize_local, normalize_remote};
pub use router::Dispatcher;
pub use types::{ErrorKind, InvocationFailure, InvocationResult, ToolCall, ToolOutput};
