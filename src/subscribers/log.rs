//! # LogWriter: renders events through `tracing`
//!
//! Installed by the `bridgevisor` binary. Routine lifecycle events log at
//! `info`/`debug`, recoverable failures at `warn`, fatal conditions at `error`.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO bridgevisor: guest ready pid=4242 attempt=1 startup_ms=38
//! INFO bridgevisor: invocation received request_id="8476a536" n=1 time_left_ms=2998
//! WARN bridgevisor: invocation failed request_id="8476a536" error_type="GuestCrash" duration_ms=12
//! WARN bridgevisor: poll retry scheduled attempt=1 delay_ms=87 reason="transport error: ..."
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event subscriber that writes structured `tracing` records.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let rid = e.request_id.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::InvocationReceived => tracing::info!(
                target: "bridgevisor",
                request_id = rid,
                n = e.invocation,
                time_left_ms = e.timeout_ms,
                "invocation received"
            ),
            EventKind::InvocationStarted => tracing::debug!(
                target: "bridgevisor",
                request_id = rid,
                pid = e.pid,
                "invocation handed to guest"
            ),
            EventKind::InvocationSucceeded => tracing::info!(
                target: "bridgevisor",
                request_id = rid,
                duration_ms = e.duration_ms,
                "invocation succeeded"
            ),
            EventKind::InvocationFailed => tracing::warn!(
                target: "bridgevisor",
                request_id = rid,
                error_type = e.error_type.as_deref().unwrap_or("-"),
                duration_ms = e.duration_ms,
                reason,
                "invocation failed"
            ),
            EventKind::TimeoutHit => tracing::warn!(
                target: "bridgevisor",
                request_id = rid,
                pid = e.pid,
                timeout_ms = e.timeout_ms,
                "invocation deadline expired"
            ),
            EventKind::GuestStarting => tracing::info!(
                target: "bridgevisor",
                attempt = e.attempt,
                "starting guest"
            ),
            EventKind::GuestReady => tracing::info!(
                target: "bridgevisor",
                pid = e.pid,
                attempt = e.attempt,
                startup_ms = e.duration_ms,
                "guest ready"
            ),
            EventKind::GuestInitFailed => tracing::error!(
                target: "bridgevisor",
                attempt = e.attempt,
                reason,
                "guest initialization failed"
            ),
            EventKind::GuestExited => tracing::warn!(
                target: "bridgevisor",
                pid = e.pid,
                reason,
                "guest exited"
            ),
            EventKind::GuestKilled => tracing::warn!(
                target: "bridgevisor",
                pid = e.pid,
                reason,
                "guest killed"
            ),
            EventKind::RestartScheduled => tracing::info!(
                target: "bridgevisor",
                streak = e.attempt,
                delay_ms = e.delay_ms,
                "guest restart scheduled"
            ),
            EventKind::RestartsExhausted => tracing::error!(
                target: "bridgevisor",
                streak = e.attempt,
                "guest restart budget exhausted"
            ),
            EventKind::PollRetryScheduled => tracing::warn!(
                target: "bridgevisor",
                attempt = e.attempt,
                delay_ms = e.delay_ms,
                reason,
                "poll retry scheduled"
            ),
            EventKind::ControlPlaneUnreachable => tracing::error!(
                target: "bridgevisor",
                attempts = e.attempt,
                reason,
                "control plane unreachable"
            ),
            EventKind::ReportFailed => tracing::warn!(
                target: "bridgevisor",
                request_id = rid,
                reason,
                "report not delivered"
            ),
            EventKind::ShutdownRequested => {
                tracing::info!(target: "bridgevisor", "shutdown requested")
            }
            EventKind::BridgeStopped => tracing::info!(
                target: "bridgevisor",
                served = e.invocation,
                reason,
                "bridge stopped"
            ),
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                tracing::warn!(target: "bridgevisor", kind = ?e.kind, reason, "subscriber fault")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
