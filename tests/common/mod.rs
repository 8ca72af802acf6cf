//! In-memory providers built on the public connection traits.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use toolbridge::catalog::{InputSchema, ParamKind, ToolDescriptor};
use toolbridge::provider::{Connector, ProviderConnection, ProviderConfig, ProviderError, RemoteOutput};

/// Tool names with special behavior in `ScriptedConnection::call`.
pub const HANG_TOOL: &str = "hang";
pub const FAIL_TOOL: &str = "fail";

/// Scripted providers keyed by name; counts every connect, call, and ping.
#[derive(Default)]
pub struct ScriptedConnector {
    tools: Mutex<HashMap<String, Vec<String>>>,
    refusing: Mutex<HashSet<String>>,
    failing_pings: Arc<Mutex<HashMap<String, u32>>>,
    connects: AtomicUsize,
    calls: Arc<AtomicUsize>,
    pings: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(self, name: &str, tools: &[&str]) -> Self {
        self.tools
            .lock()
            .insert(name.to_string(), tools.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Every connect to `name` fails as if the process could not start.
    pub fn refusing(self, name: &str) -> Self {
        self.refusing.lock().insert(name.to_string());
        self
    }

    /// The next `count` pings to `name` fail.
    pub fn fail_pings(&self, name: &str, count: u32) {
        self.failing_pings.lock().insert(name.to_string(), count);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, config: &ProviderConfig) -> Result<Arc<dyn ProviderConnection>, ProviderError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refusing.lock().contains(&config.name) {
            return Err(ProviderError::Connection {
                name: config.name.clone(),
                reason: format!("failed to spawn '{}': No such file or directory", config.command),
            });
        }

        let tools = self.tools.lock().get(&config.name).cloned().unwrap_or_default();
        Ok(Arc::new(ScriptedConnection {
            provider: config.name.clone(),
            tools,
            calls: Arc::clone(&self.calls),
            pings: Arc::clone(&self.pings),
            failing_pings: Arc::clone(&self.failing_pings),
        }))
    }
}

pub struct ScriptedConnection {
    provider: String,
    tools: Vec<String>,
    calls: Arc<AtomicUsize>,
    pings: Arc<AtomicUsize>,
    failing_pings: Arc<Mutex<HashMap<String, u32>>>,
}

#[async_trait]
impl ProviderConnection for ScriptedConnection {
    async fn list_capabilities(&self, _timeout: Duration) -> Result<Vec<ToolDescriptor>, ProviderError> {
        Ok(self
            .tools
            .iter()
            .map(|name| {
                let schema = InputSchema::builder()
                    .optional("a", ParamKind::Number, "")
                    .optional("b", ParamKind::Number, "")
                    .build();
                ToolDescriptor::remote(&self.provider, name, &format!("scripted {name}"), schema)
            })
            .collect())
    }

    async fn call(&self, tool: &str, arguments: Value, timeout: Duration) -> Result<RemoteOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match tool {
            HANG_TOOL => {
                tokio::time::sleep(timeout).await;
                Err(ProviderError::Timeout {
                    name: self.provider.clone(),
                    method: "tools/call".into(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            FAIL_TOOL => Err(ProviderError::Remote {
                code: -32603,
                message: "scripted failure".into(),
                data: None,
            }),
            _ => {
                let a = arguments.get("a").and_then(Value::as_f64);
                let b = arguments.get("b").and_then(Value::as_f64);
                let body = match (a, b) {
                    (Some(a), Some(b)) => json!({ "provider": self.provider, "tool": tool, "product": a * b }),
                    _ => json!({ "provider": self.provider, "tool": tool }),
                };
                Ok(RemoteOutput::text(&body.to_string()))
            }
        }
    }

    async fn ping(&self, _timeout: Duration) -> Result<(), ProviderError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let mut failing = self.failing_pings.lock();
        match failing.get_mut(&self.provider) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ProviderError::Transport {
                    name: self.provider.clone(),
                    reason: "scripted probe failure".into(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn stop(&self) {}
}
