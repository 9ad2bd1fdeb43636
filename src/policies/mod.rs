//! Retry and restart policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization to keep a fleet from retrying in lockstep
//! - [`RestartPolicy`] how many back-to-back guest restarts are tolerated
//!
//! ## Wiring
//! ```text
//! Config { poll_backoff, poll_retries, restart }
//!    ├─► client::retry::with_retry   uses poll_backoff.next(n) between polls
//!    └─► guest::GuestSupervisor      uses restart.allows(streak) / delay_before(streak)
//! ```

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
