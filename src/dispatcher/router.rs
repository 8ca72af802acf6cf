//! Dispatcher: routes a named tool call to its local handler or provider.
//!
//! Every call flows through:
//! 1. Catalog resolution (unknown names fail fast with suggestions)
//! 2. Argument validation against the tool's input schema
//! 3. Local execution, or provider execution with reconnect and retry
//! 4. Result normalization shared by both origins
//!
//! `invoke` never returns an error: every failure is an `InvocationResult`.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::{json, Value};

use super::normalize::{normalize_local, normalize_remote};
use super::types::{ErrorKind, InvocationFailure, InvocationResult, ToolCall};
use crate::catalog::{
    CapabilityCatalog, CatalogError, LocalHandler, Registration, ToolDescriptor, ToolRoute, ToolSummary,
};
use crate::config::{BridgeConfig, HealthSettings, RetrySettings, TimeoutSettings};
use crate::provider::{
    Connector, HealthMonitor, LiveConnection, ProcessConnector, ProviderConfig, ProviderError, ProviderHealth,
    ProviderRegistry, RemoteOutput,
};

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Public entry point for tool invocation.
pub struct Dispatcher {
    catalog: Arc<CapabilityCatalog>,
    registry: Arc<ProviderRegistry>,
    timeouts: TimeoutSettings,
    retry: RetrySettings,
    health: HealthSettings,
}

impl Dispatcher {
    /// Build a dispatcher that launches providers as child processes.
    ///
    /// Providers are registered but not started; call `start_providers`.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ProviderError> {
        let connector = Arc::new(ProcessConnector::new(config.timeouts.clone()));
        Self::with_connector(config, connector)
    }

    /// Build a dispatcher around any `Connector`.
    ///
    /// The config is validated first, so zero timeouts or a zero probe
    /// interval are rejected here rather than inside a spawned task.
    pub fn with_connector(config: &BridgeConfig, connector: Arc<dyn Connector>) -> Result<Self, ProviderError> {
        config.validate()?;
        let catalog = Arc::new(CapabilityCatalog::new());
        let registry = Arc::new(ProviderRegistry::new(
            Arc::clone(&catalog),
            connector,
            config.timeouts.clone(),
        ));
        for provider in config.provider_configs() {
            registry.add_provider(provider)?;
        }

        Ok(Self {
            catalog,
            registry,
            timeouts: config.timeouts.clone(),
            retry: config.retry.clone(),
            health: config.health.clone(),
        })
    }

    pub fn catalog(&self) -> &Arc<CapabilityCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Register an in-process tool. Allowed before or after providers start.
    pub fn register_local(
        &self,
        descriptor: ToolDescriptor,
        handler: LocalHandler,
    ) -> Result<Registration, CatalogError> {
        let name = descriptor.name.clone();
        let registration = self.catalog.register_local(descriptor, handler)?;
        tracing::debug!(tool = %name, ?registration, "local tool registered");
        Ok(registration)
    }

    /// Add a provider after construction. It starts Disconnected.
    pub fn add_provider(&self, config: ProviderConfig) -> Result<(), ProviderError> {
        self.registry.add_provider(config)
    }

    /// Start every enabled provider concurrently.
    ///
    /// Returns the providers that failed; the rest are Ready.
    pub async fn start_providers(&self) -> BTreeMap<String, ProviderError> {
        let failures = self.registry.start_all().await;
        for (name, error) in &failures {
            tracing::warn!(provider = %name, error = %error, "provider failed to start");
        }
        tracing::info!(
            providers = self.registry.provider_names().len(),
            failed = failures.len(),
            tools = self.catalog.len(),
            "providers started"
        );
        failures
    }

    /// A health monitor bound to this dispatcher's registry and settings.
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(Arc::clone(&self.registry), self.health.clone())
    }

    /// Snapshot of every tool, sorted by name. Never touches provider I/O.
    pub fn list_all(&self) -> Vec<ToolSummary> {
        self.catalog.list()
    }

    /// Provider name → current health.
    pub fn get_health(&self) -> BTreeMap<String, ProviderHealth> {
        self.registry.health_snapshot()
    }

    /// Close every provider.
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }

    // ─── Invocation ──────────────────────────────────────────────────────

    /// Invoke a tool by name.
    pub async fn invoke(&self, name: &str, arguments: Value) -> InvocationResult {
        let start = Instant::now();
        let result = self.dispatch(name, arguments).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            InvocationResult::Success(_) => {
                tracing::debug!(tool = %name, elapsed_ms, "tool call succeeded");
            }
            InvocationResult::Failure(failure) => {
                tracing::warn!(
                    tool = %name,
                    kind = %failure.kind,
                    elapsed_ms,
                    error = %failure.message,
                    "tool call failed"
                );
            }
        }
        result
    }

    /// Invoke each call in order, one at a time.
    ///
    /// A failure does not stop the batch; every call gets a result.
    pub async fn invoke_batch(&self, calls: &[ToolCall]) -> Vec<InvocationResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.invoke(&call.name, call.arguments.clone()).await);
        }
        results
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> InvocationResult {
        let resolved = match self.catalog.resolve(name) {
            Ok(resolved) => resolved,
            Err(e) => return InvocationResult::failure(ErrorKind::NotFound, e.to_string()),
        };

        if let Err(e) = resolved.descriptor.input_schema.validate(name, &arguments) {
            return InvocationResult::failure(ErrorKind::InvalidArguments, e.to_string());
        }
        let arguments = if arguments.is_null() { json!({}) } else { arguments };

        match resolved.route {
            ToolRoute::Local(handler) => self.invoke_local(name, handler, arguments).await,
            ToolRoute::Provider(provider) => self.invoke_remote(&provider, name, arguments).await,
        }
    }

    // ─── Local ───────────────────────────────────────────────────────────

    async fn invoke_local(&self, name: &str, handler: LocalHandler, arguments: Value) -> InvocationResult {
        let timeout = self.timeouts.local();
        let call = AssertUnwindSafe(handler.call(arguments)).catch_unwind();

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(value))) => InvocationResult::success(normalize_local(value)),
            Ok(Ok(Err(e))) => InvocationResult::failure(ErrorKind::LocalExecutionError, format!("{e:#}")),
            Ok(Err(panic)) => InvocationResult::failure(
                ErrorKind::LocalExecutionError,
                format!("local tool '{name}' panicked: {}", panic_message(panic.as_ref())),
            ),
            Err(_) => InvocationResult::failure(
                ErrorKind::Timeout,
                format!("local tool '{name}' timed out after {}ms", timeout.as_millis()),
            ),
        }
    }

    // ─── Remote ──────────────────────────────────────────────────────────

    /// Call a provider tool, retrying timeouts and unavailability.
    async fn invoke_remote(&self, provider: &str, tool: &str, arguments: Value) -> InvocationResult {
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.backoff(attempt);
                tracing::debug!(
                    provider,
                    tool,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying provider call"
                );
                tokio::time::sleep(delay).await;
            }

            let failure = match self.call_provider(provider, tool, arguments.clone()).await {
                Ok(output) => {
                    return match normalize_remote(output) {
                        Ok(value) => InvocationResult::success(value),
                        Err(message) => InvocationResult::failure(ErrorKind::RemoteExecutionError, message),
                    };
                }
                Err(failure) => failure,
            };

            if !failure.kind.is_retryable() || attempt == self.retry.max_retries {
                return InvocationResult::Failure(failure);
            }
            tracing::warn!(
                provider,
                tool,
                attempt = attempt + 1,
                max_retries = self.retry.max_retries,
                error = %failure.message,
                "retriable provider failure"
            );
        }

        // The loop always returns on its last attempt.
        InvocationResult::failure(
            ErrorKind::ProviderUnavailable,
            format!("provider '{provider}' exhausted its retries"),
        )
    }

    async fn call_provider(
        &self,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<RemoteOutput, InvocationFailure> {
        let live = self.ready_connection(provider).await?;

        match live.connection.call(tool, arguments, self.timeouts.call()).await {
            Ok(output) => Ok(output),
            Err(e) => {
                if matches!(e, ProviderError::Transport { .. }) {
                    // The session is unusable; retire it so the next attempt reconnects.
                    if let Err(close_err) = self.registry.close_session(provider, live.session_id, &e.to_string()).await
                    {
                        tracing::debug!(provider, error = %close_err, "closing broken session failed");
                    }
                }
                Err(classify(&e))
            }
        }
    }

    /// A callable connection, reconnecting a Disconnected or Closed provider.
    async fn ready_connection(&self, provider: &str) -> Result<LiveConnection, InvocationFailure> {
        match self.registry.connection(provider) {
            Ok(live) => return Ok(live),
            Err(ProviderError::NotConnected { .. }) => {}
            Err(e) => return Err(classify(&e)),
        }

        let config = self.registry.config(provider).map_err(|e| classify(&e))?;
        if !config.enabled {
            return Err(InvocationFailure::new(
                ErrorKind::ProviderUnavailable,
                format!("provider '{provider}' is disabled"),
            ));
        }

        let mut last_error = None;
        for attempt in 1..=self.retry.reconnect_attempts {
            tracing::info!(provider, attempt, max = self.retry.reconnect_attempts, "reconnecting provider");
            let outcome = match self.registry.start(provider).await {
                Ok(()) => self.registry.connection(provider),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(live) => return Ok(live),
                Err(e) => {
                    tracing::warn!(provider, attempt, error = %e, "reconnect failed");
                    last_error = Some(e);
                }
            }
        }

        let state = self
            .registry
            .state(provider)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let message = match last_error {
            Some(e) => format!("provider '{provider}' is unavailable: {e}"),
            None => format!("provider '{provider}' is unavailable (state: {state})"),
        };
        Err(InvocationFailure::new(ErrorKind::ProviderUnavailable, message))
    }
}

/// Map a provider-side error onto the caller-facing kind.
fn classify(error: &ProviderError) -> InvocationFailure {
    let kind = match error {
        ProviderError::Timeout { .. } => ErrorKind::Timeout,
        ProviderError::Remote { .. } => ErrorKind::RemoteExecutionError,
        ProviderError::Protocol { .. } | ProviderError::Catalog(_) => ErrorKind::ProtocolError,
        ProviderError::Config(_) => ErrorKind::ProviderUnavailable,
        ProviderError::Transport { .. }
        | ProviderError::NotConnected { .. }
        | ProviderError::Connection { .. }
        | ProviderError::ProviderStartup { .. }
        | ProviderError::UnknownProvider { .. }
        | ProviderError::DuplicateProvider { .. }
        | ProviderError::InvalidTransition { .. } => ErrorKind::ProviderUnavailable,
    };
    InvocationFailure::new(kind, error.to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
