//! Resilience supervisor
//!
//! The single place that decides retry versus identity rotation after a
//! turn failure. Fatal (setup) failures never reach it.

use crate::identity::SessionIdentity;
use std::time::Duration;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// What the relay loop must do after a counted failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Budget remains: go back to the handshake with the same identity
    Retry { consecutive_errors: u32 },
    /// Budget exhausted: sleep `cooldown`, then rotate identity
    Rotate {
        consecutive_errors: u32,
        cooldown: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct ResilienceSupervisor {
    threshold: u32,
    cooldown_min: Duration,
    cooldown_max: Duration,
    consecutive_errors: u32,
}

impl ResilienceSupervisor {
    #[must_use]
    pub fn new(threshold: u32, cooldown_min: Duration, cooldown_max: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown_min,
            cooldown_max,
            consecutive_errors: 0,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// A turn completed end to end
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Count a turn failure. The cooldown is drawn from the current
    /// identity's random source.
    pub fn record_failure(&mut self, identity: &mut SessionIdentity) -> FailureVerdict {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors < self.threshold {
            return FailureVerdict::Retry {
                consecutive_errors: self.consecutive_errors,
            };
        }
        FailureVerdict::Rotate {
            consecutive_errors: self.consecutive_errors,
            cooldown: identity.draw_cooldown(self.cooldown_min, self.cooldown_max),
        }
    }

    /// Replace the identity after the cooldown and clear the error budget.
    pub fn rotate(&mut self, identity: &mut SessionIdentity) -> SessionIdentity {
        self.consecutive_errors = 0;
        identity.successor()
    }
}

impl Default for ResilienceSupervisor {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            Duration::from_secs(15),
            Duration::from_secs(45),
        )
    }
}
