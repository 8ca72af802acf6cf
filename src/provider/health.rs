//! Health monitor: periodic liveness probes over every live provider.
//!
//! A failed probe degrades a Ready session. After `failure_threshold`
//! consecutive failures the provider is closed and, if `auto_restart` is on
//! and the restart budget allows, started again on a fresh session.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::registry::{LiveConnection, ProviderRegistry};
use super::types::{ConnectionState, HealthTransition};
use crate::config::HealthSettings;

pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    settings: HealthSettings,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ProviderRegistry>, settings: HealthSettings) -> Self {
        Self { registry, settings }
    }

    /// Probe every Ready/Degraded provider concurrently.
    ///
    /// Returns every state change caused by this round, in provider order.
    pub async fn probe_all(&self) -> Vec<HealthTransition> {
        let live = self.registry.live_connections();
        let rounds = join_all(live.into_iter().map(|(name, conn)| self.probe_connection(name, conn))).await;
        rounds.into_iter().flatten().collect()
    }

    /// Probe one provider. Not-live providers produce no transitions.
    pub async fn probe(&self, name: &str) -> Vec<HealthTransition> {
        match self.registry.connection(name) {
            Ok(conn) => self.probe_connection(name.to_string(), conn).await,
            Err(_) => Vec::new(),
        }
    }

    async fn probe_connection(&self, name: String, live: LiveConnection) -> Vec<HealthTransition> {
        let outcome = live.connection.ping(self.settings.probe_timeout()).await;

        let mut transitions = Vec::new();
        match outcome {
            Ok(()) => {
                if let Some(t) = self.registry.record_probe_success(&name, live.session_id) {
                    tracing::info!(provider = %name, from = %t.from, to = %t.to, "provider recovered");
                    transitions.push(t);
                }
            }
            Err(e) => {
                let reason = e.to_string();
                let (transition, failures) = self.registry.record_probe_failure(&name, live.session_id, &reason);
                tracing::warn!(
                    provider = %name,
                    failures,
                    threshold = self.settings.failure_threshold,
                    error = %reason,
                    "health probe failed"
                );
                transitions.extend(transition);

                if failures >= self.settings.failure_threshold {
                    transitions.extend(self.give_up(&name, &live, failures).await);
                }
            }
        }
        transitions
    }

    /// Close a provider that exhausted its probe budget, then maybe restart it.
    async fn give_up(&self, name: &str, live: &LiveConnection, failures: u32) -> Vec<HealthTransition> {
        let mut transitions = Vec::new();
        let reason = format!("{failures} consecutive health probes failed");

        match self.registry.close_session(name, live.session_id, &reason).await {
            Ok(Some(t)) => {
                tracing::warn!(provider = name, "{reason}; provider closed");
                transitions.push(t);
            }
            // Someone else already replaced or closed this session.
            Ok(None) | Err(_) => return transitions,
        }

        if !self.settings.auto_restart {
            return transitions;
        }

        let restarts = self.registry.session(name).map(|s| s.restarts).unwrap_or(u32::MAX);
        if restarts >= self.settings.max_restarts {
            tracing::error!(
                provider = name,
                restarts,
                max_restarts = self.settings.max_restarts,
                "restart budget exhausted; provider stays closed"
            );
            return transitions;
        }

        match self.registry.start(name).await {
            Ok(()) => {
                tracing::info!(provider = name, attempt = restarts + 1, "provider restarted");
                transitions.push(HealthTransition {
                    provider: name.to_string(),
                    from: ConnectionState::Closed,
                    to: ConnectionState::Ready,
                    at: Utc::now(),
                    reason: Some(format!("restarted ({}/{})", restarts + 1, self.settings.max_restarts)),
                });
            }
            Err(e) => {
                tracing::error!(provider = name, error = %e, "provider restart failed");
            }
        }
        transitions
    }

    /// Run `probe_all` every `interval` on a background task.
    pub fn spawn(self) -> HealthMonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.settings.interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::debug!(interval_ms = interval.as_millis() as u64, "health monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let transitions = self.probe_all().await;
                        if !transitions.is_empty() {
                            tracing::debug!(count = transitions.len(), "health round changed provider states");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("health monitor stopped");
        });

        HealthMonitorHandle { shutdown_tx, task }
    }
}

/// Handle to a running health monitor loop.
pub struct HealthMonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HealthMonitorHandle {
    /// Signal the loop to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "health monitor task ended abnormally");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
