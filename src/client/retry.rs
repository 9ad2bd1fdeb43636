//! # Bounded retry for control-plane polls.
//!
//! ```text
//! attempt 1 ── Err ──► PollRetryScheduled{delay=b(0)} ──► sleep
//! attempt 2 ── Err ──► PollRetryScheduled{delay=b(1)} ──► sleep
//! ...
//! attempt N ── Err ──► ControlPlaneUnreachable ──► Err(BridgeError)
//! any attempt ── Ok ──► return
//! ```
//!
//! The budget is per call: a successful poll starts the next call from attempt 1.

use std::future::Future;

use crate::error::{BridgeError, ClientError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;

/// Runs `op` up to `attempts` times (min 1), sleeping `backoff.next(n)` between failures.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    backoff: &BackoffPolicy,
    bus: &Bus,
    mut op: F,
) -> Result<T, BridgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let attempts = attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if attempt >= attempts {
            bus.publish(
                Event::new(EventKind::ControlPlaneUnreachable)
                    .with_attempt(attempt)
                    .with_reason(err.to_string()),
            );
            return Err(BridgeError::ControlPlaneUnreachable {
                attempts: attempt,
                last_error: err.to_string(),
            });
        }

        let delay = backoff.next(attempt - 1);
        bus.publish(
            Event::new(EventKind::PollRetryScheduled)
                .with_attempt(attempt)
                .with_delay(delay)
                .with_reason(err.to_string()),
        );
        tokio::time::sleep(delay).await;
    }
}
