//! # Restart policy for the guest process.
//!
//! A crashed or timed-out guest is restarted lazily, once, before the next
//! invocation. [`RestartPolicy`] bounds how many of those restarts may happen
//! back to back before the container is declared unhealthy:
//!
//! ```text
//! failures since last success:  1        2            3           ...  max+1
//! action:                       restart  wait b(0)    wait b(1)        Failed
//!                               now      + restart    + restart
//! ```
//!
//! Any successful invocation resets the streak.

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Bounds consecutive guest restarts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RestartPolicy {
    /// Maximum consecutive restarts without an intervening success (`0` = unlimited).
    pub max_restarts: u32,
    /// Delay schedule for the second and later restarts in a streak.
    pub backoff: BackoffPolicy,
}

impl Default for RestartPolicy {
    /// `max_restarts = 5`, default exponential backoff.
    fn default() -> Self {
        Self {
            max_restarts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RestartPolicy {
    /// Returns `true` if restart number `streak` (1-based) is still allowed.
    pub fn allows(&self, streak: u32) -> bool {
        self.max_restarts == 0 || streak <= self.max_restarts
    }

    /// Delay to wait before restart number `streak` (1-based).
    ///
    /// The first restart in a streak is immediate.
    pub fn delay_before(&self, streak: u32) -> Duration {
        match streak {
            0 | 1 => Duration::ZERO,
            n => self.backoff.next(n - 2),
        }
    }
}
