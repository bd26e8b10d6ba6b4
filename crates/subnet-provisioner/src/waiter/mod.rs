//! Association polling
//!
//! Bridges the asynchronous association request to a completion signal.
//! Polling backs off exponentially, is bounded by an attempt count and an
//! overall deadline, and stops as soon as the caller's cancellation token
//! fires, including while a poll is still in flight. Abandoning a wait needs no local cleanup, but the remote
//! association is left as it is.
//!
//! "Not associated yet" and "the poll itself failed" are tracked apart:
//! retryable transport errors consume the transient-failure budget, every
//! poll consumes the attempt budget.

mod state;

pub use state::{AssociationWait, WaitState};

use crate::control_plane::ControlPlane;
use crate::models::AddressBlock;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Poll timing and bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Delay before the second poll
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
    /// Growth factor between delays
    pub multiplier: f64,
    /// Polls before giving up, `None` for no bound
    pub max_attempts: Option<u32>,
    /// Retryable poll failures tolerated before giving up
    pub max_transient_failures: u32,
    /// Overall time budget, `None` for no bound
    pub deadline_ms: Option<u64>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: Some(60),
            max_transient_failures: 5,
            deadline_ms: Some(600_000),
        }
    }
}

impl PollPolicy {
    /// Delay after the `attempt`-th poll (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let delay = delay.min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }

    /// Overall time budget
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "poll multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::Config(
                "poll max_delay_ms must be greater than or equal to initial_delay_ms".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::Config("poll max_attempts must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Polls the control plane until an association is active
pub struct ProvisioningWaiter<C> {
    control_plane: Arc<C>,
    policy: PollPolicy,
}

impl<C: ControlPlane> ProvisioningWaiter<C> {
    pub fn new(control_plane: Arc<C>, policy: PollPolicy) -> Self {
        Self {
            control_plane,
            policy,
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Poll until `wait` becomes active, returning the associated block
    #[instrument(skip(self, wait, cancel), fields(
        resource_id = %wait.resource_id(),
        association_id = wait.association_id().unwrap_or("none"),
    ))]
    pub async fn wait(
        &self,
        wait: &mut AssociationWait,
        cancel: &CancellationToken,
    ) -> Result<AddressBlock> {
        let association_id = wait
            .association_id()
            .ok_or_else(|| {
                Error::Internal(format!(
                    "cannot wait on {} before the association is requested",
                    wait.resource_id()
                ))
            })?
            .to_string();
        let resource_id = wait.resource_id().to_string();

        let started = Instant::now();
        let deadline_at = self.policy.deadline().map(|d| started + d);
        let mut attempts = 0u32;
        let mut transient_failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(association_id));
            }

            attempts += 1;
            let poll = self.control_plane.poll_associations(&resource_id);
            let bounded = async {
                match deadline_at {
                    Some(at) => tokio::time::timeout_at(at, poll).await.ok(),
                    None => Some(poll.await),
                }
            };
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled(association_id)),
                polled = bounded => polled,
            };
            let Some(polled) = polled else {
                warn!(attempts, "Association poll outlived the deadline");
                return Err(Error::Timeout {
                    association_id,
                    attempts,
                });
            };

            match polled {
                Ok(entries) => {
                    if let Some(block) = wait.observe(entries.as_deref())? {
                        info!(%block, attempts, "Association is active");
                        return Ok(block);
                    }
                    debug!(attempts, "Association not active yet");
                }
                Err(e) if e.is_retryable() => {
                    transient_failures += 1;
                    warn!(error = %e, transient_failures, "Association poll failed");
                    if transient_failures > self.policy.max_transient_failures {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }

            if let Some(max) = self.policy.max_attempts {
                if attempts >= max {
                    return Err(Error::Timeout {
                        association_id,
                        attempts,
                    });
                }
            }

            let delay = self.policy.delay_for(attempts - 1);
            if let Some(deadline) = self.policy.deadline() {
                if started.elapsed() + delay > deadline {
                    return Err(Error::Timeout {
                        association_id,
                        attempts,
                    });
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled(association_id)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        PollPolicy::default().validate().unwrap();
    }

    #[test]
    fn test_delay_backoff() {
        let policy = PollPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
            ..Default::default()
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = PollPolicy {
            initial_delay_ms: 3000,
            max_delay_ms: 3000,
            multiplier: 1.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(0), policy.delay_for(10));
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        let shrinking = PollPolicy {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());

        let inverted = PollPolicy {
            initial_delay_ms: 5000,
            max_delay_ms: 100,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let zero_attempts = PollPolicy {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(zero_attempts.validate().is_err());
    }
}
