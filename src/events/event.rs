//! # Runtime events emitted by the dispatcher, the guest supervisor and the client.
//!
//! [`EventKind`] falls into four groups:
//! - **Invocation events**: one invocation's path through the loop
//! - **Guest events**: process start, readiness, exit, kill, restart scheduling
//! - **Control-plane events**: poll retries and failed reports
//! - **Runtime events**: shutdown and subscriber health
//!
//! [`Event`] carries optional metadata (request id, pid, durations, error type).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore order after fan-out.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use bridgevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::InvocationFailed)
//!     .with_request("8476a536-e9f4-11e8-9739-2dfe598c3fcd")
//!     .with_error_type("GuestCrash")
//!     .with_duration(Duration::from_millis(42));
//!
//! assert_eq!(ev.kind, EventKind::InvocationFailed);
//! assert_eq!(ev.error_type.as_deref(), Some("GuestCrash"));
//! assert_eq!(ev.duration_ms, Some(42));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Invocation events ===
    /// An invocation was received from the control plane.
    ///
    /// Sets: `request_id`, `invocation` (counter), `timeout_ms` (time left).
    InvocationReceived,

    /// The invocation was written to the guest (`Ready → Invoking`).
    ///
    /// Sets: `request_id`, `pid`.
    InvocationStarted,

    /// The guest answered with a success payload.
    ///
    /// Sets: `request_id`, `duration_ms`.
    InvocationSucceeded,

    /// The invocation ended in a failure envelope.
    ///
    /// Sets: `request_id`, `error_type`, `reason` (message), `duration_ms`.
    InvocationFailed,

    /// The per-invocation deadline fired before the guest answered.
    ///
    /// Sets: `request_id`, `timeout_ms`, `pid`.
    TimeoutHit,

    // === Guest events ===
    /// A guest process is being spawned.
    ///
    /// Sets: `attempt` (lifetime start count, 1-based).
    GuestStarting,

    /// Handshake completed; the guest accepts invocations.
    ///
    /// Sets: `pid`, `attempt`, `duration_ms` (spawn to ready).
    GuestReady,

    /// Spawn or handshake failed.
    ///
    /// Sets: `attempt`, `reason`.
    GuestInitFailed,

    /// The guest exited or its channel closed outside of a requested shutdown.
    ///
    /// Sets: `pid`, `reason`.
    GuestExited,

    /// The guest was killed by the bridge (deadline or shutdown).
    ///
    /// Sets: `pid`, `reason`.
    GuestKilled,

    /// A restart will happen after a delay.
    ///
    /// Sets: `attempt` (restart streak), `delay_ms`.
    RestartScheduled,

    /// Consecutive restarts exceeded the restart budget; the guest is `Failed`.
    ///
    /// Sets: `attempt` (streak).
    RestartsExhausted,

    // === Control-plane events ===
    /// A failed `next` poll will be retried.
    ///
    /// Sets: `attempt` (failed attempt, 1-based), `delay_ms`, `reason`.
    PollRetryScheduled,

    /// The retry budget for `next` was exhausted.
    ///
    /// Sets: `attempt`, `reason`.
    ControlPlaneUnreachable,

    /// An outcome or init-error report could not be delivered.
    ///
    /// Sets: `request_id` (if any), `reason`.
    ReportFailed,

    // === Runtime events ===
    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    /// The dispatcher loop exited.
    ///
    /// Sets: `invocation` (total served), `reason` (exit label).
    BridgeStopped,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` (subscriber name and panic info).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` (subscriber name and cause).
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Control-plane request id, when the event concerns one invocation.
    pub request_id: Option<Arc<str>>,
    /// Bridge-local invocation counter value.
    pub invocation: Option<u64>,
    /// Guest process id.
    pub pid: Option<u32>,
    /// Attempt / streak counter (meaning depends on `kind`).
    pub attempt: Option<u32>,
    /// Deadline budget or time left, in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Delay before the next retry or restart, in milliseconds.
    pub delay_ms: Option<u32>,
    /// Elapsed time, in milliseconds.
    pub duration_ms: Option<u32>,
    /// `errorType` of a failure envelope.
    pub error_type: Option<Arc<str>>,
    /// Human-readable reason (error messages, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

#[inline]
fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            request_id: None,
            invocation: None,
            pid: None,
            attempt: None,
            timeout_ms: None,
            delay_ms: None,
            duration_ms: None,
            error_type: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_request(mut self, id: impl AsRef<str>) -> Self {
        self.request_id = Some(Arc::from(id.as_ref()));
        self
    }

    #[inline]
    pub fn with_invocation(mut self, n: u64) -> Self {
        self.invocation = Some(n);
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    #[inline]
    pub fn with_duration(mut self, d: Duration) -> Self {
        self.duration_ms = Some(compact_ms(d));
        self
    }

    #[inline]
    pub fn with_error_type(mut self, t: impl AsRef<str>) -> Self {
        self.error_type = Some(Arc::from(t.as_ref()));
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl AsRef<str>) -> Self {
        self.reason = Some(Arc::from(reason.as_ref()));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::GuestStarting);
        let b = Event::new(EventKind::GuestReady);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_durations_are_compacted() {
        let ev = Event::new(EventKind::TimeoutHit).with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }
}
