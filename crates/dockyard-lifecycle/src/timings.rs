//! Resolved lifecycle durations.

use std::time::Duration;

use dockyard_core::{ConfigResult, LifecycleSettings};

/// `[lifecycle]` settings with every duration string parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleTimings {
    pub grace_period: Duration,
    pub expiry_warning_window: Duration,
    pub recreate_max_attempts: u32,
    pub remediation_cap: usize,
    pub remediation_delay: Duration,
    pub restart_settle: Duration,
    pub failed_cutoff: Duration,
    pub pod_health_interval: Duration,
    pub expiry_check_interval: Duration,
    pub cleanup_interval: Duration,
    pub orphan_scan_interval: Duration,
}

impl LifecycleTimings {
    pub fn from_settings(s: &LifecycleSettings) -> ConfigResult<Self> {
        Ok(Self {
            grace_period: s.grace_period(),
            expiry_warning_window: s.expiry_warning_window()?,
            recreate_max_attempts: s.pod_recreate_max_attempts.max(1),
            remediation_cap: s.remediation_cap,
            remediation_delay: s.remediation_delay()?,
            restart_settle: s.restart_settle()?,
            failed_cutoff: s.failed_cutoff()?,
            pod_health_interval: s.pod_health_interval()?,
            expiry_check_interval: s.expiry_check_interval()?,
            cleanup_interval: s.cleanup_interval()?,
            orphan_scan_interval: s.orphan_scan_interval()?,
        })
    }

    /// Delay before create attempt `attempt + 1`: `2^attempt` minutes.
    pub fn recreate_delay(attempt: u32) -> Duration {
        Duration::from_secs(60u64.saturating_mul(1u64 << attempt.min(16)))
    }
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(60 * 24 * 60 * 60),
            expiry_warning_window: Duration::from_secs(3 * 24 * 60 * 60),
            recreate_max_attempts: 3,
            remediation_cap: 10,
            remediation_delay: Duration::from_secs(120),
            restart_settle: Duration::from_secs(10),
            failed_cutoff: Duration::from_secs(24 * 60 * 60),
            pod_health_interval: Duration::from_secs(120),
            expiry_check_interval: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(6 * 3600),
            orphan_scan_interval: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_settings_defaults() {
        let parsed = LifecycleTimings::from_settings(&LifecycleSettings::default()).unwrap();
        assert_eq!(parsed, LifecycleTimings::default());
    }

    #[test]
    fn recreate_delays_double() {
        assert_eq!(LifecycleTimings::recreate_delay(1), Duration::from_secs(120));
        assert_eq!(LifecycleTimings::recreate_delay(2), Duration::from_secs(240));
        assert!(LifecycleTimings::recreate_delay(3) > LifecycleTimings::recreate_delay(2));
    }

    #[test]
    fn bad_durations_are_rejected() {
        let settings = LifecycleSettings {
            restart_settle: "soon".into(),
            ..Default::default()
        };
        assert!(LifecycleTimings::from_settings(&settings).is_err());
    }
}
