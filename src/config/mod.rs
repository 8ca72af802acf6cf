//! Bridge configuration loading and validation.
//!
//! Reads `toolbridge.yaml`, resolves environment variables, and exposes the
//! provider list plus the timeout, retry, health, and logging knobs. Every
//! section is optional; missing values fall back to the defaults below.

pub mod errors;
pub mod interpolate;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub use errors::ConfigError;
pub use interpolate::{expand_tilde, interpolate_env_vars};

use crate::provider::ProviderConfig;

/// File name searched for by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "toolbridge.yaml";

/// Env var that points directly at a config file.
pub const CONFIG_ENV_VAR: &str = "TOOLBRIDGE_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// One provider entry, keyed by name under `providers:`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tools expected from this provider, registered before it is reached.
    #[serde(default)]
    pub declared_tools: Vec<String>,
}

impl Default for ProviderSpec {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            enabled: default_true(),
            declared_tools: Vec::new(),
        }
    }
}

impl ProviderSpec {
    /// Build the runtime config for the provider called `name`.
    pub fn to_provider_config(&self, name: &str) -> ProviderConfig {
        let mut config = ProviderConfig::new(name, &self.command)
            .args(self.args.iter().cloned())
            .enabled(self.enabled)
            .declared_tools(self.declared_tools.iter().cloned());
        config.env = self.env.clone();
        if let Some(dir) = &self.cwd {
            config = config.cwd(expand_tilde(dir));
        }
        config
    }
}

/// Deadlines for every suspending operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeoutSettings {
    /// `initialize` + first `tools/list`.
    #[serde(default = "default_handshake_ms")]
    pub handshake_ms: u64,
    /// One `tools/call` round trip.
    #[serde(default = "default_call_ms")]
    pub call_ms: u64,
    /// One local handler invocation.
    #[serde(default = "default_local_ms")]
    pub local_ms: u64,
    /// How long a provider gets to exit after `shutdown` before it is killed.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl TimeoutSettings {
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }

    pub fn local(&self) -> Duration {
        Duration::from_millis(self.local_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            handshake_ms: default_handshake_ms(),
            call_ms: default_call_ms(),
            local_ms: default_local_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Retry policy for provider calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetrySettings {
    /// Extra attempts after the first for timeouts and unavailability.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff step: attempt `n` waits `n * backoff_step_ms`.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// Restarts tried for a Disconnected/Closed provider before a call fails.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
}

impl RetrySettings {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_step_ms: default_backoff_step_ms(),
            reconnect_attempts: default_reconnect_attempts(),
        }
    }
}

/// Health monitor policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Consecutive failed probes before a provider is closed.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_true")]
    pub auto_restart: bool,
    /// Restart budget per provider over the process lifetime.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            auto_restart: true,
            max_restarts: default_max_restarts(),
        }
    }
}

/// Tracing subscriber setup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
    /// Log file; stderr when absent.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Rotated log files to keep next to `file`.
    #[serde(default = "default_keep_files")]
    pub keep_files: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
            keep_files: default_keep_files(),
        }
    }
}

/// Top-level configuration (mirrors `toolbridge.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSpec>,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub logging: LogSettings,
}

fn default_true() -> bool {
    true
}
fn default_handshake_ms() -> u64 {
    30_000
}
fn default_call_ms() -> u64 {
    30_000
}
fn default_local_ms() -> u64 {
    30_000
}
fn default_shutdown_grace_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_step_ms() -> u64 {
    250
}
fn default_reconnect_attempts() -> u32 {
    1
}
fn default_interval_ms() -> u64 {
    30_000
}
fn default_probe_timeout_ms() -> u64 {
    5_000
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_max_restarts() -> u32 {
    3
}
fn default_log_level() -> String {
    "toolbridge=info,warn".to_string()
}
fn default_keep_files() -> usize {
    3
}

impl BridgeConfig {
    /// Provider configs in name order.
    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        self.providers
            .iter()
            .map(|(name, spec)| spec.to_provider_config(name))
            .collect()
    }

    /// Reject values that would make the bridge unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid { reason }) };

        for (name, spec) in &self.providers {
            if name.trim().is_empty() {
                return invalid("provider name must not be empty".into());
            }
            if spec.command.trim().is_empty() {
                return invalid(format!("provider '{name}' has an empty command"));
            }
        }

        let t = &self.timeouts;
        for (field, value) in [
            ("timeouts.handshake_ms", t.handshake_ms),
            ("timeouts.call_ms", t.call_ms),
            ("timeouts.local_ms", t.local_ms),
            ("health.interval_ms", self.health.interval_ms),
            ("health.probe_timeout_ms", self.health.probe_timeout_ms),
        ] {
            if value == 0 {
                return invalid(format!("{field} must be greater than zero"));
            }
        }

        if self.health.failure_threshold == 0 {
            return invalid("health.failure_threshold must be at least 1".into());
        }

        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate `toolbridge.yaml`.
///
/// Checks `TOOLBRIDGE_CONFIG` first, then searches upward from `start`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    // 1. Check env var
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.is_file() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound {
        reason: format!("no {CONFIG_FILE_NAME} above {}", start.display()),
    })
}

/// Load, interpolate, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let config = from_yaml_str(&raw)?;
    tracing::debug!(
        path = %path.display(),
        providers = config.providers.len(),
        "loaded config"
    );
    Ok(config)
}

/// Parse and validate config text. Env vars are interpolated first.
pub fn from_yaml_str(raw: &str) -> Result<BridgeConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    // An empty file is a valid, all-defaults config.
    if interpolated.trim().is_empty() {
        return Ok(BridgeConfig::default());
    }

    let config: BridgeConfig = serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
