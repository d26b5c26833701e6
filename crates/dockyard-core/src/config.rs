//! dockyard.toml configuration parser.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration. Durations are humantime strings (`"30s"`, `"2m"`,
//! `"60days"`) and are parsed through the accessor methods.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockyardConfig {
    pub state: StateConfig,
    pub platform: PlatformConfig,
    pub health: HealthSettings,
    pub reconciler: ReconcilerSettings,
    pub lifecycle: LifecycleSettings,
    pub queue: QueueSettings,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding `dockyard.redb`.
    pub data_dir: PathBuf,
    /// Keep all state in memory (development only).
    pub in_memory: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/dockyard"),
            in_memory: false,
        }
    }
}

/// Which control-plane client the daemon talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformMode {
    Kubernetes,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub mode: PlatformMode,
    /// Prefix for per-user namespaces; also the orphan-scan fallback heuristic.
    pub namespace_prefix: String,
    /// Value of the `dockyard.io/managed-by` label.
    pub managed_by: String,
    /// Base domain for external ingress hosts (`{subdomain}.{ingress_domain}`).
    pub ingress_domain: String,
    pub ingress_class: Option<String>,
    pub tls: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            mode: PlatformMode::Kubernetes,
            namespace_prefix: "dy".to_string(),
            managed_by: "dockyard".to_string(),
            ingress_domain: "apps.local".to_string(),
            ingress_class: Some("nginx".to_string()),
            tls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub heartbeat_timeout_minutes: u64,
    pub inactive_timeout_minutes: u64,
    pub sweep_interval: String,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_minutes: 5,
            inactive_timeout_minutes: 10,
            sweep_interval: "2m".to_string(),
        }
    }
}

impl HealthSettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_minutes * 60)
    }

    pub fn inactive_timeout(&self) -> Duration {
        Duration::from_secs(self.inactive_timeout_minutes * 60)
    }

    pub fn sweep_interval(&self) -> ConfigResult<Duration> {
        parse_field("health.sweep_interval", &self.sweep_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
    pub interval: String,
    pub metrics_interval: String,
    pub usage_retention: String,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval: "1m".to_string(),
            metrics_interval: "5m".to_string(),
            usage_retention: "30days".to_string(),
        }
    }
}

impl ReconcilerSettings {
    pub fn interval(&self) -> ConfigResult<Duration> {
        parse_field("reconciler.interval", &self.interval)
    }

    pub fn metrics_interval(&self) -> ConfigResult<Duration> {
        parse_field("reconciler.metrics_interval", &self.metrics_interval)
    }

    pub fn usage_retention(&self) -> ConfigResult<Duration> {
        parse_field("reconciler.usage_retention", &self.usage_retention)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub grace_period_days: u64,
    pub expiry_warning_window: String,
    pub pod_recreate_max_attempts: u32,
    /// Maximum remediation jobs queued by one pod health sweep.
    pub remediation_cap: usize,
    pub remediation_delay: String,
    /// Bounded wait between a restart and the follow-up status read.
    pub restart_settle: String,
    /// How long an instance may stay FAILED before cleanup acts on it.
    pub failed_cutoff: String,
    pub pod_health_interval: String,
    pub expiry_check_interval: String,
    pub cleanup_interval: String,
    pub orphan_scan_interval: String,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            grace_period_days: 60,
            expiry_warning_window: "3days".to_string(),
            pod_recreate_max_attempts: 3,
            remediation_cap: 10,
            remediation_delay: "2m".to_string(),
            restart_settle: "10s".to_string(),
            failed_cutoff: "24h".to_string(),
            pod_health_interval: "2m".to_string(),
            expiry_check_interval: "1h".to_string(),
            cleanup_interval: "6h".to_string(),
            orphan_scan_interval: "1h".to_string(),
        }
    }
}

impl LifecycleSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_days * 24 * 60 * 60)
    }

    pub fn expiry_warning_window(&self) -> ConfigResult<Duration> {
        parse_field("lifecycle.expiry_warning_window", &self.expiry_warning_window)
    }

    pub fn remediation_delay(&self) -> ConfigResult<Duration> {
        parse_field("lifecycle.remediation_delay", &self.remediation_delay)
    }

    pub fn restart_settle(&self) -> ConfigResult<Duration> {
        parse_field("lifecycle.restart_settle", &self.restart_settle)
    }

    pub fn failed_cutoff(&self) -> ConfigResult<Duration> {
        parse_field("lifecycle.failed_cutoff", &self.failed_cutoff)
    }

    pub fn pod_health_interval(&self) -> ConfigResult<Duration> {
        parse_field("lifecycle.pod_health_interval", &self.pod_health_interval)
    }

    pub fn expiry_check_interval(&self) -> ConfigResult<Duration> {
        parse_field("lifecycle.expiry_check_interval", &self.expiry_check_interval)
    }

    pub fn cleanup_interval(&self) -> ConfigResult<Duration> {
        parse_field("lifecycle.cleanup_interval", &self.cleanup_interval)
    }

    pub fn orphan_scan_interval(&self) -> ConfigResult<Duration> {
        parse_field("lifecycle.orphan_scan_interval", &self.orphan_scan_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackendKind {
    /// Jobs persisted in the state store; survive restarts.
    Durable,
    Memory,
}

/// Per-lane overrides of the built-in lane policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneOverride {
    pub max_attempts: Option<u32>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub backend: QueueBackendKind,
    /// Idle workers re-check their lane at least this often.
    pub poll_interval: String,
    /// Dead-lettered jobs are deleted once they are older than this.
    pub dead_letter_retention: String,
    /// Keyed by lane name (`subscription`, `pod`, `notification`, `billing`, `cleanup`).
    pub lanes: BTreeMap<String, LaneOverride>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::Durable,
            poll_interval: "1s".to_string(),
            dead_letter_retention: "7days".to_string(),
            lanes: BTreeMap::new(),
        }
    }
}

impl QueueSettings {
    pub fn poll_interval(&self) -> ConfigResult<Duration> {
        parse_field("queue.poll_interval", &self.poll_interval)
    }

    pub fn dead_letter_retention(&self) -> ConfigResult<Duration> {
        parse_field("queue.dead_letter_retention", &self.dead_letter_retention)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8440,
        }
    }
}

impl DockyardConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: DockyardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check cross-field constraints and that every duration string parses.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.health.heartbeat_timeout_minutes == 0 {
            return Err(ConfigError::Invalid(
                "health.heartbeat_timeout_minutes must be positive".to_string(),
            ));
        }
        if self.health.inactive_timeout_minutes <= self.health.heartbeat_timeout_minutes {
            return Err(ConfigError::Invalid(format!(
                "health.inactive_timeout_minutes ({}) must exceed heartbeat_timeout_minutes ({})",
                self.health.inactive_timeout_minutes, self.health.heartbeat_timeout_minutes
            )));
        }
        if self.lifecycle.pod_recreate_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.pod_recreate_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.platform.namespace_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "platform.namespace_prefix must not be empty".to_string(),
            ));
        }

        self.health.sweep_interval()?;
        self.reconciler.interval()?;
        self.reconciler.metrics_interval()?;
        self.reconciler.usage_retention()?;
        self.lifecycle.expiry_warning_window()?;
        self.lifecycle.remediation_delay()?;
        self.lifecycle.restart_settle()?;
        self.lifecycle.failed_cutoff()?;
        self.lifecycle.pod_health_interval()?;
        self.lifecycle.expiry_check_interval()?;
        self.lifecycle.cleanup_interval()?;
        self.lifecycle.orphan_scan_interval()?;
        self.queue.poll_interval()?;
        self.queue.dead_letter_retention()?;
        Ok(())
    }
}

/// Parse a humantime duration string such as `"30s"`, `"2m"`, or `"60days"`.
pub fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s.trim())
}

fn parse_field(field: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).map_err(|e| ConfigError::Duration {
        field: field.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = DockyardConfig::from_toml_str("").unwrap();
        assert_eq!(config.health.heartbeat_timeout(), Duration::from_secs(300));
        assert_eq!(config.health.inactive_timeout(), Duration::from_secs(600));
        assert_eq!(config.health.sweep_interval().unwrap(), Duration::from_secs(120));
        assert_eq!(
            config.reconciler.metrics_interval().unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(config.lifecycle.grace_period(), Duration::from_secs(60 * 86_400));
        assert_eq!(config.lifecycle.pod_recreate_max_attempts, 3);
        assert_eq!(config.lifecycle.remediation_cap, 10);
        assert_eq!(config.platform.mode, PlatformMode::Kubernetes);
        assert_eq!(config.queue.backend, QueueBackendKind::Durable);
        assert_eq!(
            config.queue.dead_letter_retention().unwrap(),
            Duration::from_secs(7 * 86_400)
        );
    }

    #[test]
    fn parse_overrides() {
        let toml_str = r#"
[platform]
mode = "simulated"
ingress_domain = "apps.example.com"

[health]
heartbeat_timeout_minutes = 2
inactive_timeout_minutes = 4

[queue.lanes.pod]
max_attempts = 7
concurrency = 3
"#;
        let config = DockyardConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.platform.mode, PlatformMode::Simulated);
        assert_eq!(config.platform.ingress_domain, "apps.example.com");
        assert_eq!(config.health.heartbeat_timeout(), Duration::from_secs(120));
        let pod = config.queue.lanes.get("pod").unwrap();
        assert_eq!(pod.max_attempts, Some(7));
        assert_eq!(pod.concurrency, Some(3));
        // Untouched sections keep their defaults.
        assert_eq!(config.lifecycle.grace_period_days, 60);
    }

    #[test]
    fn inactive_must_exceed_heartbeat_timeout() {
        let toml_str = r#"
[health]
heartbeat_timeout_minutes = 10
inactive_timeout_minutes = 10
"#;
        let err = DockyardConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_duration_names_the_field() {
        let toml_str = r#"
[lifecycle]
remediation_delay = "soon"
"#;
        let err = DockyardConfig::from_toml_str(toml_str).unwrap_err();
        match err {
            ConfigError::Duration { field, .. } => assert_eq!(field, "lifecycle.remediation_delay"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockyard.toml");
        let config = DockyardConfig::default();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = DockyardConfig::from_file(&path).unwrap();
        assert_eq!(loaded.api.port, 8440);
        assert_eq!(loaded.platform.namespace_prefix, "dy");
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("60days").unwrap(), Duration::from_secs(60 * 86_400));
        assert!(parse_duration("later").is_err());
    }
}
