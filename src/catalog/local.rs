//! In-process tool handlers.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// An in-process function callable through the dispatcher.
///
/// Errors are reported back to the caller verbatim as a
/// `LocalExecutionError`; they are never retried.
///
/// A returned string is read the way provider text is: if it parses as JSON
/// the caller gets that value, so `"123"` arrives as the number `123` and
/// `"true"` as a bool. Return `Value::String` of a JSON-quoted string (for
/// example `"\"123\""`) to hand back text that looks like JSON.
#[async_trait]
pub trait LocalTool: Send + Sync {
    async fn call(&self, arguments: Value) -> anyhow::Result<Value>;
}

/// Shared handle to a local tool.
pub type LocalHandler = Arc<dyn LocalTool>;

struct AsyncFnTool<F>(F);

#[async_trait]
impl<F, Fut> LocalTool for AsyncFnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        (self.0)(arguments).await
    }
}

struct SyncFnTool<F>(F);

#[async_trait]
impl<F> LocalTool for SyncFnTool<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        (self.0)(arguments)
    }
}

/// Wrap an async closure as a local tool.
pub fn local_fn<F, Fut>(f: F) -> LocalHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(AsyncFnTool(f))
}

/// Wrap a synchronous closure as a local tool.
pub fn local_sync_fn<F>(f: F) -> LocalHandler
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(SyncFnTool(f))
}
