//! In-memory providers for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::connection::{Connector, ProviderConnection};
use super::errors::ProviderError;
use super::types::{ProviderConfig, RemoteOutput};
use crate::catalog::{InputSchema, ParamKind, ToolDescriptor};

/// One scripted answer to `call` or `ping`.
pub(crate) enum FakeReply {
    Output(RemoteOutput),
    Error(ProviderError),
    /// Never answer; the caller's timeout fires.
    Hang,
}

pub(crate) struct FakeConnection {
    provider: String,
    tools: Mutex<Vec<ToolDescriptor>>,
    calls: AtomicUsize,
    pings: AtomicUsize,
    stopped: AtomicBool,
    call_script: Mutex<VecDeque<FakeReply>>,
    ping_script: Mutex<VecDeque<FakeReply>>,
}

impl FakeConnection {
    fn new(provider: &str, tools: &[String]) -> Self {
        let conn = Self {
            provider: provider.to_string(),
            tools: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            call_script: Mutex::new(VecDeque::new()),
            ping_script: Mutex::new(VecDeque::new()),
        };
        *conn.tools.lock() = tools.iter().map(|t| fake_tool(provider, t)).collect();
        conn
    }

    pub fn set_tools(&self, names: &[&str]) {
        *self.tools.lock() = names.iter().map(|t| fake_tool(&self.provider, t)).collect();
    }

    pub fn push_call(&self, reply: FakeReply) {
        self.call_script.lock().push_back(reply);
    }

    pub fn push_ping(&self, reply: FakeReply) {
        self.ping_script.lock().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn timeout_error(&self, method: &str, timeout: Duration) -> ProviderError {
        ProviderError::Timeout {
            name: self.provider.clone(),
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    fn stopped_error(&self) -> ProviderError {
        ProviderError::Transport {
            name: self.provider.clone(),
            reason: "connection stopped".into(),
        }
    }
}

/// Tools with two optional numeric parameters, enough to exercise validation.
fn fake_tool(provider: &str, name: &str) -> ToolDescriptor {
    let schema = InputSchema::builder()
        .optional("a", ParamKind::Number, "")
        .optional("b", ParamKind::Number, "")
        .build();
    ToolDescriptor::remote(provider, name, &format!("fake {name}"), schema)
}

#[async_trait]
impl ProviderConnection for FakeConnection {
    async fn list_capabilities(&self, _timeout: Duration) -> Result<Vec<ToolDescriptor>, ProviderError> {
        if self.is_stopped() {
            return Err(self.stopped_error());
        }
        Ok(self.tools.lock().clone())
    }

    async fn call(&self, tool: &str, arguments: Value, timeout: Duration) -> Result<RemoteOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_stopped() {
            return Err(self.stopped_error());
        }
        let reply = self.call_script.lock().pop_front();
        match reply {
            Some(FakeReply::Output(out)) => Ok(out),
            Some(FakeReply::Error(e)) => Err(e),
            Some(FakeReply::Hang) => {
                tokio::time::sleep(timeout).await;
                Err(self.timeout_error("tools/call", timeout))
            }
            None => Ok(RemoteOutput::text(
                &json!({ "tool": tool, "arguments": arguments }).to_string(),
            )),
        }
    }

    async fn ping(&self, timeout: Duration) -> Result<(), ProviderError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.is_stopped() {
            return Err(self.stopped_error());
        }
        let reply = self.ping_script.lock().pop_front();
        match reply {
            Some(FakeReply::Error(e)) => Err(e),
            Some(FakeReply::Hang) => {
                tokio::time::sleep(timeout).await;
                Err(self.timeout_error("ping", timeout))
            }
            Some(FakeReply::Output(_)) | None => Ok(()),
        }
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Hands out `FakeConnection`s and counts connects.
#[derive(Default)]
pub(crate) struct FakeConnector {
    tools: Mutex<HashMap<String, Vec<String>>>,
    failing: Mutex<HashMap<String, String>>,
    hanging: Mutex<HashMap<String, usize>>,
    connects: AtomicUsize,
    connects_by_name: Mutex<HashMap<String, usize>>,
    latest: Mutex<HashMap<String, Arc<FakeConnection>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `name` connect and advertise `tools`.
    pub fn provider(self, name: &str, tools: &[&str]) -> Self {
        self.tools
            .lock()
            .insert(name.to_string(), tools.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Make every connect to `name` fail.
    pub fn failing(self, name: &str, reason: &str) -> Self {
        self.set_failing(name, Some(reason));
        self
    }

    pub fn set_failing(&self, name: &str, reason: Option<&str>) {
        let mut failing = self.failing.lock();
        match reason {
            Some(reason) => {
                failing.insert(name.to_string(), reason.to_string());
            }
            None => {
                failing.remove(name);
            }
        }
    }

    /// Make the next `count` connects to `name` never complete.
    pub fn hanging(self, name: &str, count: usize) -> Self {
        self.hanging.lock().insert(name.to_string(), count);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connects attempted for `name` alone.
    pub fn connects_for(&self, name: &str) -> usize {
        self.connects_by_name.lock().get(name).copied().unwrap_or(0)
    }

    /// The most recent connection made for `name`.
    pub fn connection(&self, name: &str) -> Option<Arc<FakeConnection>> {
        self.latest.lock().get(name).cloned()
    }

    /// Total tool calls across every connection ever made.
    pub fn total_calls(&self) -> usize {
        self.latest.lock().values().map(|c| c.call_count()).sum()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &ProviderConfig) -> Result<Arc<dyn ProviderConnection>, ProviderError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.connects_by_name.lock().entry(config.name.clone()).or_insert(0) += 1;

        let hang = match self.hanging.lock().get_mut(&config.name) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        if hang {
            std::future::pending::<()>().await;
        }

        if let Some(reason) = self.failing.lock().get(&config.name) {
            return Err(ProviderError::Connection {
                name: config.name.clone(),
                reason: reason.clone(),
            });
        }

        let tools = self.tools.lock().get(&config.name).cloned().unwrap_or_default();
        let conn = Arc::new(FakeConnection::new(&config.name, &tools));
        self.latest.lock().insert(config.name.clone(), Arc::clone(&conn));
        Ok(conn)
    }
}
