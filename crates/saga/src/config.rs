//! Runtime settings for the coordinator and the sweeper.

use std::time::Duration as StdDuration;

use chrono::Duration;

/// Coordinator policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long a `PENDING` hold lives before it may be swept.
    pub hold_ttl: Duration,
    /// Upper bound on the quantity of a single hold request.
    pub max_tickets_per_hold: u32,
    /// Re-read and retry budget when a compare-and-transition conflicts.
    pub max_transition_attempts: u32,
}

impl CoordinatorConfig {
    /// Sets the hold TTL.
    pub fn with_hold_ttl(mut self, hold_ttl: Duration) -> Self {
        self.hold_ttl = hold_ttl;
        self
    }

    /// Sets the per-request quantity ceiling.
    pub fn with_max_tickets_per_hold(mut self, max: u32) -> Self {
        self.max_tickets_per_hold = max;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::seconds(600),
            max_tickets_per_hold: 10,
            max_transition_attempts: 5,
        }
    }
}

/// Sweeper schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    pub interval: StdDuration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: StdDuration::from_secs(30),
        }
    }
}
