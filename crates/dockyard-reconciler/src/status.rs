//! Pure status derivation from what the platform reports.

use dockyard_platform::ReplicaCounts;
use dockyard_state::PodStatus;

/// What could be observed about an instance's deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The control plane did not answer.
    Unreachable,
    /// No deployment reference, or the deployment does not exist.
    Missing,
    Replicas(ReplicaCounts),
}

/// Map an observation to an instance status.
///
/// Checks apply in order; the first match wins:
///
/// 1. unreachable → `Error`
/// 2. missing → `Unknown`
/// 3. desired == 0 → `Stopped`
/// 4. available == ready == desired → `Running`
/// 5. available == 0 → `Failed`
/// 6. otherwise → `Pending`
pub fn derive_status(observation: Observation) -> PodStatus {
    let counts = match observation {
        Observation::Unreachable => return PodStatus::Error,
        Observation::Missing => return PodStatus::Unknown,
        Observation::Replicas(counts) => counts,
    };
    if counts.desired == 0 {
        PodStatus::Stopped
    } else if counts.available == counts.desired && counts.ready == counts.desired {
        PodStatus::Running
    } else if counts.available == 0 {
        PodStatus::Failed
    } else {
        PodStatus::Pending
    }
}

/// Short human-readable reason stored next to the status.
pub fn status_message(status: PodStatus, counts: Option<ReplicaCounts>) -> String {
    match (status, counts) {
        (PodStatus::Error, _) => "control plane unreachable".to_string(),
        (PodStatus::Unknown, _) => "deployment not found".to_string(),
        (PodStatus::Stopped, _) => "scaled to zero".to_string(),
        (_, Some(c)) => format!("{}/{} ready, {} available", c.ready, c.desired, c.available),
        (_, None) => status.as_str().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn counts(desired: u32, ready: u32, available: u32) -> Observation {
        Observation::Replicas(ReplicaCounts {
            desired,
            ready,
            available,
            updated: desired,
        })
    }

    #[test]
    fn priority_order() {
        assert_eq!(derive_status(Observation::Unreachable), PodStatus::Error);
        assert_eq!(derive_status(Observation::Missing), PodStatus::Unknown);
        assert_eq!(derive_status(counts(0, 0, 0)), PodStatus::Stopped);
        assert_eq!(derive_status(counts(2, 2, 2)), PodStatus::Running);
        assert_eq!(derive_status(counts(2, 0, 0)), PodStatus::Failed);
        assert_eq!(derive_status(counts(2, 1, 1)), PodStatus::Pending);
        // Available but not yet ready is still rolling out.
        assert_eq!(derive_status(counts(1, 0, 1)), PodStatus::Pending);
    }

    #[test]
    fn messages_mention_counts() {
        let c = ReplicaCounts {
            desired: 3,
            ready: 1,
            available: 2,
            updated: 3,
        };
        assert_eq!(status_message(PodStatus::Pending, Some(c)), "1/3 ready, 2 available");
        assert_eq!(status_message(PodStatus::Unknown, None), "deployment not found");
    }

    proptest! {
        #[test]
        fn derivation_is_total_and_consistent(
            desired in 0u32..8,
            ready_frac in 0u32..=8,
            avail_frac in 0u32..=8,
        ) {
            let ready = ready_frac.min(desired);
            let available = avail_frac.min(desired);
            let status = derive_status(counts(desired, ready, available));

            // Same input, same answer.
            prop_assert_eq!(status, derive_status(counts(desired, ready, available)));
            prop_assert!(matches!(
                status,
                PodStatus::Stopped | PodStatus::Running | PodStatus::Failed | PodStatus::Pending
            ));
            prop_assert_eq!(status == PodStatus::Stopped, desired == 0);
            if desired > 0 {
                prop_assert_eq!(
                    status == PodStatus::Running,
                    ready == desired && available == desired
                );
                prop_assert_eq!(status == PodStatus::Failed, available == 0);
            }
        }
    }
}
