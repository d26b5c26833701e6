//! Lanes and their retry/concurrency policies.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dockyard_core::QueueSettings;
use tracing::warn;

use crate::error::QueueError;

/// An independently configured stream of jobs grouped by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lane {
    Subscription,
    Pod,
    Notification,
    Billing,
    Cleanup,
}

impl Lane {
    pub const ALL: [Lane; 5] = [
        Lane::Subscription,
        Lane::Pod,
        Lane::Notification,
        Lane::Billing,
        Lane::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Pod => "pod",
            Self::Notification => "notification",
            Self::Billing => "billing",
            Self::Cleanup => "cleanup",
        }
    }

    /// Built-in policy for the lane.
    pub fn default_policy(self) -> LanePolicy {
        let (max_attempts, backoff, concurrency) = match self {
            Self::Subscription => (3, Backoff::Exponential(Duration::from_secs(5)), 2),
            Self::Pod => (5, Backoff::Exponential(Duration::from_secs(30)), 2),
            Self::Notification => (3, Backoff::Exponential(Duration::from_secs(2)), 3),
            Self::Billing => (3, Backoff::Fixed(Duration::from_secs(60)), 1),
            Self::Cleanup => (2, Backoff::Fixed(Duration::from_secs(300)), 1),
        };
        LanePolicy {
            max_attempts,
            backoff,
            concurrency,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Lane::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| QueueError::UnknownLane(s.to_string()))
    }
}

/// Delay before the next attempt of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`.
    Exponential(Duration),
}

/// Exponential delays stop growing after this many doublings.
const MAX_DOUBLINGS: u32 = 16;

impl Backoff {
    /// Delay after `attempt` (1-based) has failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(d) => d,
            Self::Exponential(base) => {
                let doublings = attempt.saturating_sub(1).min(MAX_DOUBLINGS);
                base.saturating_mul(1 << doublings)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanePolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub concurrency: usize,
}

/// Policies for every lane, with config overrides applied.
#[derive(Debug, Clone)]
pub struct LanePolicies(BTreeMap<Lane, LanePolicy>);

impl Default for LanePolicies {
    fn default() -> Self {
        Self(Lane::ALL.into_iter().map(|l| (l, l.default_policy())).collect())
    }
}

impl LanePolicies {
    /// Apply `[queue.lanes.<name>]` overrides on top of the defaults.
    pub fn from_settings(settings: &QueueSettings) -> Self {
        let mut policies = Self::default();
        for (name, o) in &settings.lanes {
            let Ok(lane) = name.parse::<Lane>() else {
                warn!(lane = %name, "ignoring override for unknown lane");
                continue;
            };
            let policy = policies.0.entry(lane).or_insert_with(|| lane.default_policy());
            if let Some(n) = o.max_attempts {
                policy.max_attempts = n.max(1);
            }
            if let Some(n) = o.concurrency {
                policy.concurrency = n.max(1);
            }
        }
        policies
    }

    pub fn get(&self, lane: Lane) -> LanePolicy {
        self.0.get(&lane).copied().unwrap_or_else(|| lane.default_policy())
    }

    pub fn set(&mut self, lane: Lane, policy: LanePolicy) {
        self.0.insert(lane, policy);
    }
}
