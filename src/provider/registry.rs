//! Provider registry: owns every provider session and its state.
//!
//! Responsibilities:
//! - One slot per configured provider, with at most one live session
//! - The session state machine (Disconnected → Connecting → Ready ⇄ Degraded → Closed)
//! - Keeping the capability catalog in step with each session's tool set
//!
//! Lifecycle operations (start, close, restart, remove, refresh) on one
//! provider are serialized by that provider's async mutex. Different
//! providers never block each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use uuid::Uuid;

use super::connection::{Connector, ProviderConnection};
use super::errors::ProviderError;
use super::types::{ConnectionState, HealthTransition, ProviderConfig, ProviderHealth};
use crate::catalog::{CapabilityCatalog, InputSchema, ToolDescriptor};
use crate::config::TimeoutSettings;

// ─── Session Record ──────────────────────────────────────────────────────────

/// Everything the registry tracks about one provider session.
#[derive(Clone)]
pub struct SessionRecord {
    pub id: Uuid,
    pub state: ConnectionState,
    connection: Option<Arc<dyn ProviderConnection>>,
    /// Tool names discovered on this session.
    pub tools: Vec<String>,
    pub last_healthy_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Sessions started for this provider before this one.
    pub restarts: u32,
    pub last_error: Option<String>,
}

impl SessionRecord {
    fn fresh(restarts: u32, last_error: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ConnectionState::Disconnected,
            connection: None,
            tools: Vec::new(),
            last_healthy_at: None,
            consecutive_failures: 0,
            restarts,
            last_error,
        }
    }

    fn transition(&mut self, provider: &str, to: ConnectionState) -> Result<ConnectionState, ProviderError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(ProviderError::InvalidTransition {
                name: provider.to_string(),
                from,
                to,
            });
        }
        tracing::debug!(provider, session = %self.id, %from, %to, "session state change");
        self.state = to;
        Ok(from)
    }
}

/// A callable connection handed out to the dispatcher and health monitor.
#[derive(Clone)]
pub struct LiveConnection {
    pub session_id: Uuid,
    pub state: ConnectionState,
    pub connection: Arc<dyn ProviderConnection>,
}

struct ProviderSlot {
    config: ProviderConfig,
    lifecycle: tokio::sync::Mutex<()>,
    session: RwLock<SessionRecord>,
}

// ─── ProviderRegistry ────────────────────────────────────────────────────────

/// Owns provider configs, sessions, and their catalog entries.
pub struct ProviderRegistry {
    slots: RwLock<HashMap<String, Arc<ProviderSlot>>>,
    catalog: Arc<CapabilityCatalog>,
    connector: Arc<dyn Connector>,
    timeouts: TimeoutSettings,
}

impl ProviderRegistry {
    pub fn new(catalog: Arc<CapabilityCatalog>, connector: Arc<dyn Connector>, timeouts: TimeoutSettings) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            catalog,
            connector,
            timeouts,
        }
    }

    /// The catalog this registry keeps in sync.
    pub fn catalog(&self) -> &Arc<CapabilityCatalog> {
        &self.catalog
    }

    /// Register a provider without starting it.
    ///
    /// Any `declared_tools` are claimed in the catalog right away so calls to
    /// them read as unavailable, not unknown, until the provider is reached.
    pub fn add_provider(&self, config: ProviderConfig) -> Result<(), ProviderError> {
        let mut slots = self.slots.write();
        if slots.contains_key(&config.name) {
            return Err(ProviderError::DuplicateProvider { name: config.name });
        }

        self.catalog
            .register_from_provider(&config.name, declared_placeholders(&config))?;

        tracing::info!(
            provider = %config.name,
            command = %config.command,
            enabled = config.enabled,
            "provider added"
        );
        slots.insert(
            config.name.clone(),
            Arc::new(ProviderSlot {
                config,
                lifecycle: tokio::sync::Mutex::new(()),
                session: RwLock::new(SessionRecord::fresh(0, None)),
            }),
        );
        Ok(())
    }

    /// Registered provider names, sorted.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a provider is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.read().contains_key(name)
    }

    /// The provider's config.
    pub fn config(&self, name: &str) -> Result<ProviderConfig, ProviderError> {
        Ok(self.slot(name)?.config.clone())
    }

    /// Current session state, if the provider exists.
    pub fn state(&self, name: &str) -> Option<ConnectionState> {
        self.slot(name).ok().map(|slot| slot.session.read().state)
    }

    /// Snapshot of the current session record.
    pub fn session(&self, name: &str) -> Result<SessionRecord, ProviderError> {
        Ok(self.slot(name)?.session.read().clone())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Bring a provider to Ready.
    ///
    /// No-op when already Ready or Degraded. A Closed provider gets a fresh
    /// session first. On failure the session ends Closed; a name collision
    /// surfaces as `ProviderError::Catalog`.
    pub async fn start(&self, name: &str) -> Result<(), ProviderError> {
        let slot = self.slot(name)?;
        let _lifecycle = slot.lifecycle.lock().await;
        self.start_locked(&slot).await
    }

    /// Start every enabled provider that has not been started yet.
    ///
    /// Providers start concurrently. Returns the failures; the rest are Ready.
    pub async fn start_all(&self) -> BTreeMap<String, ProviderError> {
        let pending: Vec<String> = {
            let slots = self.slots.read();
            slots
                .values()
                .filter(|slot| {
                    slot.config.enabled
                        && matches!(
                            slot.session.read().state,
                            ConnectionState::Disconnected | ConnectionState::Connecting
                        )
                })
                .map(|slot| slot.config.name.clone())
                .collect()
        };

        tracing::info!(count = pending.len(), "starting providers");
        let results = join_all(pending.iter().map(|name| self.start(name))).await;

        let failures: BTreeMap<String, ProviderError> = pending
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| result.err().map(|e| (name, e)))
            .collect();

        if !failures.is_empty() {
            tracing::warn!(failed = failures.len(), "some providers failed to start");
        }
        failures
    }

    /// Stop the session, mark it Closed, and purge its discovered tools.
    pub async fn close(&self, name: &str) -> Result<(), ProviderError> {
        let slot = self.slot(name)?;
        let _lifecycle = slot.lifecycle.lock().await;
        self.close_locked(&slot, "closed on request").await;
        Ok(())
    }

    /// Close the session only if it is still `session_id`.
    ///
    /// Used when a caller observed a broken transport; a newer session
    /// started in the meantime is left alone.
    pub async fn close_session(
        &self,
        name: &str,
        session_id: Uuid,
        reason: &str,
    ) -> Result<Option<HealthTransition>, ProviderError> {
        let slot = self.slot(name)?;
        let _lifecycle = slot.lifecycle.lock().await;
        if slot.session.read().id != session_id {
            return Ok(None);
        }
        Ok(self.close_locked(&slot, reason).await)
    }

    /// Close and start a fresh session.
    pub async fn restart(&self, name: &str) -> Result<(), ProviderError> {
        let slot = self.slot(name)?;
        let _lifecycle = slot.lifecycle.lock().await;
        tracing::info!(provider = name, "restarting provider");
        self.close_locked(&slot, "restarting").await;
        self.start_locked(&slot).await
    }

    /// Stop the provider if running, purge all its tools, and forget it.
    pub async fn remove(&self, name: &str) -> Result<(), ProviderError> {
        let slot = self.slot(name)?;
        let _lifecycle = slot.lifecycle.lock().await;
        self.close_locked(&slot, "removed").await;
        let purged = self.catalog.unregister_all(name);
        self.slots.write().remove(name);
        tracing::info!(provider = name, purged, "provider removed");
        Ok(())
    }

    /// Close every provider. Runs concurrently.
    pub async fn shutdown_all(&self) {
        let slots: Vec<Arc<ProviderSlot>> = self.slots.read().values().cloned().collect();
        join_all(slots.iter().map(|slot| async move {
            let _lifecycle = slot.lifecycle.lock().await;
            self.close_locked(slot, "shutdown").await;
        }))
        .await;
        tracing::info!(count = slots.len(), "all providers shut down");
    }

    /// Re-issue `tools/list` and replace the provider's catalog entries.
    ///
    /// Returns the number of tools now owned by the provider.
    pub async fn refresh_capabilities(&self, name: &str) -> Result<usize, ProviderError> {
        let slot = self.slot(name)?;
        let _lifecycle = slot.lifecycle.lock().await;
        let live = live_connection(&slot)?;

        let tools = live.connection.list_capabilities(self.timeouts.call()).await?;
        let names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        let outcome = self.catalog.register_from_provider(name, tools)?;

        let mut record = slot.session.write();
        if record.id == live.session_id {
            record.tools = names;
        }
        tracing::info!(
            provider = name,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "refreshed provider tools"
        );
        Ok(record.tools.len())
    }

    // ─── Connections & Health ────────────────────────────────────────────

    /// The live connection, if the session is Ready or Degraded.
    pub fn connection(&self, name: &str) -> Result<LiveConnection, ProviderError> {
        let slot = self.slot(name)?;
        live_connection(&slot)
    }

    /// Every callable connection, for probing.
    pub fn live_connections(&self) -> Vec<(String, LiveConnection)> {
        let slots: Vec<Arc<ProviderSlot>> = self.slots.read().values().cloned().collect();
        let mut live: Vec<(String, LiveConnection)> = slots
            .iter()
            .filter_map(|slot| live_connection(slot).ok().map(|c| (slot.config.name.clone(), c)))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }

    /// A probe on `session_id` succeeded. Degraded → Ready.
    pub fn record_probe_success(&self, name: &str, session_id: Uuid) -> Option<HealthTransition> {
        let slot = self.slot(name).ok()?;
        let mut record = slot.session.write();
        if record.id != session_id || !record.state.is_callable() {
            return None;
        }
        record.consecutive_failures = 0;
        record.last_healthy_at = Some(Utc::now());

        if record.state != ConnectionState::Degraded {
            return None;
        }
        let from = record.transition(name, ConnectionState::Ready).ok()?;
        record.last_error = None;
        Some(HealthTransition {
            provider: name.to_string(),
            from,
            to: ConnectionState::Ready,
            at: Utc::now(),
            reason: Some("probe succeeded".into()),
        })
    }

    /// A probe on `session_id` failed. Ready → Degraded.
    ///
    /// Returns the transition (if any) and the consecutive failure count.
    pub fn record_probe_failure(
        &self,
        name: &str,
        session_id: Uuid,
        reason: &str,
    ) -> (Option<HealthTransition>, u32) {
        let Ok(slot) = self.slot(name) else {
            return (None, 0);
        };
        let mut record = slot.session.write();
        if record.id != session_id || !record.state.is_callable() {
            return (None, 0);
        }
        record.consecutive_failures += 1;
        record.last_error = Some(reason.to_string());
        let failures = record.consecutive_failures;

        if record.state != ConnectionState::Ready {
            return (None, failures);
        }
        let transition = record
            .transition(name, ConnectionState::Degraded)
            .ok()
            .map(|from| HealthTransition {
                provider: name.to_string(),
                from,
                to: ConnectionState::Degraded,
                at: Utc::now(),
                reason: Some(reason.to_string()),
            });
        (transition, failures)
    }

    /// Health of every provider, keyed by name.
    pub fn health_snapshot(&self) -> BTreeMap<String, ProviderHealth> {
        self.slots
            .read()
            .iter()
            .map(|(name, slot)| {
                let record = slot.session.read();
                (
                    name.clone(),
                    ProviderHealth {
                        session_id: record.id,
                        state: record.state,
                        enabled: slot.config.enabled,
                        tool_count: record.tools.len(),
                        last_healthy_at: record.last_healthy_at,
                        consecutive_failures: record.consecutive_failures,
                        restarts: record.restarts,
                        last_error: record.last_error.clone(),
                    },
                )
            })
            .collect()
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn slot(&self, name: &str) -> Result<Arc<ProviderSlot>, ProviderError> {
        self.slots
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider { name: name.to_string() })
    }

    /// Caller holds `slot.lifecycle`.
    async fn start_locked(&self, slot: &ProviderSlot) -> Result<(), ProviderError> {
        let name = slot.config.name.as_str();
        {
            let mut record = slot.session.write();
            match record.state {
                ConnectionState::Ready | ConnectionState::Degraded => return Ok(()),
                ConnectionState::Closed => {
                    let restarts = record.restarts + 1;
                    let last_error = record.last_error.take();
                    *record = SessionRecord::fresh(restarts, last_error);
                }
                // Only a start that was dropped mid-connect leaves this state
                // behind once the lifecycle lock is free.
                ConnectionState::Connecting => {
                    tracing::warn!(provider = name, session = %record.id, "discarding abandoned start");
                    let restarts = record.restarts;
                    let last_error = Some("previous start was cancelled".to_string());
                    *record = SessionRecord::fresh(restarts, last_error);
                }
                ConnectionState::Disconnected => {}
            }
            record.transition(name, ConnectionState::Connecting)?;
        }

        tracing::info!(provider = name, "starting provider");
        let connection = match self.connector.connect(&slot.config).await {
            Ok(connection) => connection,
            Err(e) => {
                let reason = e.to_string();
                self.fail_start(slot, &reason);
                return Err(ProviderError::ProviderStartup {
                    name: name.to_string(),
                    reason,
                });
            }
        };

        let tools = match connection.list_capabilities(self.timeouts.handshake()).await {
            Ok(tools) => tools,
            Err(e) => {
                connection.stop().await;
                let reason = format!("tool discovery failed: {e}");
                self.fail_start(slot, &reason);
                return Err(ProviderError::ProviderStartup {
                    name: name.to_string(),
                    reason,
                });
            }
        };

        let names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        if let Err(e) = self.catalog.register_from_provider(name, tools) {
            connection.stop().await;
            self.fail_start(slot, &e.to_string());
            return Err(e.into());
        }

        let mut record = slot.session.write();
        record.transition(name, ConnectionState::Ready)?;
        record.connection = Some(connection);
        record.tools = names;
        record.last_healthy_at = Some(Utc::now());
        record.consecutive_failures = 0;
        record.last_error = None;
        tracing::info!(
            provider = name,
            session = %record.id,
            tools = record.tools.len(),
            "provider ready"
        );
        Ok(())
    }

    /// Connecting → Closed after a failed start. Caller holds `slot.lifecycle`.
    fn fail_start(&self, slot: &ProviderSlot, reason: &str) {
        let name = slot.config.name.as_str();
        tracing::warn!(provider = name, reason, "provider failed to start");
        {
            let mut record = slot.session.write();
            if record.transition(name, ConnectionState::Closed).is_ok() {
                record.last_error = Some(reason.to_string());
            }
        }
        self.restore_placeholders(&slot.config);
    }

    /// Caller holds `slot.lifecycle`.
    async fn close_locked(&self, slot: &ProviderSlot, reason: &str) -> Option<HealthTransition> {
        let name = slot.config.name.as_str();
        let (from, connection) = {
            let mut record = slot.session.write();
            let from = record.transition(name, ConnectionState::Closed).ok()?;
            record.tools.clear();
            if from.is_callable() || record.last_error.is_none() {
                record.last_error = Some(reason.to_string());
            }
            (from, record.connection.take())
        };

        // Purge first so no new call routes to a dying session.
        self.restore_placeholders(&slot.config);
        if let Some(connection) = connection {
            connection.stop().await;
        }

        tracing::info!(provider = name, %from, reason, "provider closed");
        Some(HealthTransition {
            provider: name.to_string(),
            from,
            to: ConnectionState::Closed,
            at: Utc::now(),
            reason: Some(reason.to_string()),
        })
    }

    /// Drop discovered tools, leaving only declared placeholders.
    fn restore_placeholders(&self, config: &ProviderConfig) {
        if let Err(e) = self
            .catalog
            .register_from_provider(&config.name, declared_placeholders(config))
        {
            // Placeholders were claimed at add time, so this only fires if a
            // local tool took a declared name after the provider went down.
            tracing::warn!(provider = %config.name, error = %e, "could not restore declared tools");
            self.catalog.unregister_all(&config.name);
        }
    }
}

fn live_connection(slot: &ProviderSlot) -> Result<LiveConnection, ProviderError> {
    let record = slot.session.read();
    match (&record.connection, record.state.is_callable()) {
        (Some(connection), true) => Ok(LiveConnection {
            session_id: record.id,
            state: record.state,
            connection: Arc::clone(connection),
        }),
        _ => Err(ProviderError::NotConnected {
            name: slot.config.name.clone(),
            state: record.state,
        }),
    }
}

fn declared_placeholders(config: &ProviderConfig) -> Vec<ToolDescriptor> {
    let mut seen = std::collections::HashSet::new();
    config
        .declared_tools
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .map(|tool| ToolDescriptor::remote(&config.name, tool, "", InputSchema::empty()))
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
