//! # Guest supervisor: lifecycle state machine for the single guest process.
//!
//! ```text
//!              start()                 handshake ok
//! NotStarted ──────────► Starting ─────────────────► Ready ◄─────────┐
//!     ▲                     │                          │ invoke()     │ Response / Error
//!     │                     │ spawn/handshake failure  ▼              │
//!     │                     └─────────────► Failed   Invoking ────────┘
//!     │                                       ▲        │
//!     │ exit, deadline, bad reply (kill)      │        │
//!     └───────────────────────────────────────┼────────┘
//!                      restart budget exceeded┘
//! ```
//!
//! ## Rules
//! - One process at a time; the handle never leaves the supervisor.
//! - A crash or timeout never restarts eagerly: the next `start()` does, at
//!   most once per failed invocation.
//! - Consecutive failures without a healthy reply form a streak bounded by
//!   [`RestartPolicy`]; the first restart is immediate, later ones back off.
//! - Deadline expiry is destructive: the guest is killed, never interrupted.
//! - Any reply other than `Response` / `Error` costs the guest its channel:
//!   a late answer would otherwise be read as the next invocation's.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant};

use crate::config::{Config, GuestCommand};
use crate::error::GuestError;
use crate::events::{Bus, Event, EventKind};
use crate::guest::process::{GuestProcess, Reply};
use crate::guest::protocol::{Frame, HEADER_ALLOWANCE, InvokeHeader};
use crate::invocation::{Invocation, InvocationOutcome};
use crate::policies::RestartPolicy;
use crate::report::{ErrorKind, ErrorEnvelope, ExitInfo, FailureSignals, classify};

/// Time given to a guest to report its exit status after a failed write.
const WRITE_FAILURE_REAP: Duration = Duration::from_millis(100);

/// Supervisor lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestState {
    NotStarted,
    Starting,
    Ready,
    Invoking,
    Failed,
}

impl fmt::Display for GuestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GuestState::NotStarted => "not_started",
            GuestState::Starting => "starting",
            GuestState::Ready => "ready",
            GuestState::Invoking => "invoking",
            GuestState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Contract the dispatcher relies on to run invocations.
#[async_trait]
pub trait Guest: Send + 'static {
    fn state(&self) -> GuestState;

    /// Re-checks liveness of an idle guest; one that exited drops back to `NotStarted`.
    fn refresh(&mut self) {}

    /// Launches the guest and completes the handshake. A no-op when already `Ready`.
    async fn start(&mut self) -> Result<(), GuestError>;

    /// Runs one invocation to completion. Never fails: every problem becomes an outcome.
    async fn invoke(&mut self, inv: &Invocation) -> InvocationOutcome;

    /// Stops the guest gracefully (best effort).
    async fn shutdown(&mut self);
}

/// Production [`Guest`] backed by a real child process.
pub struct GuestSupervisor {
    command: GuestCommand,
    init_timeout: Duration,
    shutdown_grace: Duration,
    max_frame: usize,
    restart: RestartPolicy,
    bus: Bus,

    state: GuestState,
    process: Option<GuestProcess>,
    /// Lifetime number of launches.
    starts: u32,
    /// Consecutive guest failures since the last healthy reply.
    streak: u32,
}

impl GuestSupervisor {
    pub fn new(cfg: &Config, bus: Bus) -> Self {
        Self {
            command: cfg.guest.clone(),
            init_timeout: cfg.init_timeout,
            shutdown_grace: cfg.shutdown_grace,
            max_frame: cfg.max_payload_bytes.saturating_add(HEADER_ALLOWANCE),
            restart: cfg.restart,
            bus,
            state: GuestState::NotStarted,
            process: None,
            starts: 0,
            streak: 0,
        }
    }

    /// Process id of the running guest, if any.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(GuestProcess::pid)
    }

    /// Consecutive failures since the last healthy reply.
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Drops the current process after a failure and bumps the streak.
    fn lose_guest(&mut self) {
        self.process = None;
        self.state = GuestState::NotStarted;
        self.streak = self.streak.saturating_add(1);
    }

    fn healthy_reply(&mut self) {
        self.state = GuestState::Ready;
        self.streak = 0;
    }

    fn publish_exit(&self, pid: Option<u32>, exit: &ExitInfo) {
        self.bus.publish(
            Event::new(EventKind::GuestExited)
                .with_pid(pid)
                .with_reason(exit.to_string()),
        );
    }

    async fn await_restart_slot(&mut self) -> Result<(), GuestError> {
        if self.streak == 0 {
            return Ok(());
        }
        if !self.restart.allows(self.streak) {
            self.state = GuestState::Failed;
            self.bus
                .publish(Event::new(EventKind::RestartsExhausted).with_attempt(self.streak));
            return Err(GuestError::RestartsExhausted {
                restarts: self.streak - 1,
            });
        }
        let delay = self.restart.delay_before(self.streak);
        self.bus.publish(
            Event::new(EventKind::RestartScheduled)
                .with_attempt(self.streak)
                .with_delay(delay),
        );
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        Ok(())
    }

    /// Kills a guest whose reply could not be matched to the invocation.
    ///
    /// Replies carry no request id, so a guest that may still answer later
    /// cannot keep its channel.
    async fn abandon(&mut self, pid: Option<u32>, reason: String) -> InvocationOutcome {
        if let Some(p) = self.process.as_mut() {
            p.kill().await;
        }
        self.bus.publish(
            Event::new(EventKind::GuestKilled)
                .with_pid(pid)
                .with_reason(format!("reply channel lost: {reason}")),
        );
        self.lose_guest();
        InvocationOutcome::Failure(classify(FailureSignals::new().with_malformed(reason)))
    }

    /// Maps a guest reply to an outcome and the next state.
    async fn settle(&mut self, reply: Reply, budget: Duration) -> InvocationOutcome {
        let pid = self.pid();
        match reply {
            Reply::Frame(Frame::Response(payload)) => {
                self.healthy_reply();
                InvocationOutcome::Success(payload)
            }
            Reply::Frame(Frame::Error(envelope)) => {
                self.healthy_reply();
                InvocationOutcome::Failure(classify(FailureSignals::new().with_guest_error(envelope)))
            }
            Reply::Frame(other) => {
                self.abandon(pid, format!("guest sent {} frame instead of a reply", other.name()))
                    .await
            }
            Reply::Undecodable(e) => self.abandon(pid, format!("undecodable guest reply: {e}")).await,
            Reply::Desync(e) => self.abandon(pid, format!("unreadable guest reply: {e}")).await,
            Reply::Exited { exit, last } => {
                self.publish_exit(pid, &exit);
                self.lose_guest();
                match last {
                    Some(Frame::Response(payload)) => InvocationOutcome::Success(payload),
                    Some(Frame::Error(envelope)) => InvocationOutcome::Failure(classify(
                        FailureSignals::new().with_guest_error(envelope).with_exit(exit),
                    )),
                    _ => InvocationOutcome::Failure(classify(FailureSignals::new().with_exit(exit))),
                }
            }
            Reply::DeadlineElapsed => {
                self.bus.publish(
                    Event::new(EventKind::TimeoutHit)
                        .with_pid(pid)
                        .with_timeout(budget),
                );
                if let Some(p) = self.process.as_mut() {
                    p.kill().await;
                }
                self.bus.publish(
                    Event::new(EventKind::GuestKilled)
                        .with_pid(pid)
                        .with_reason("invocation deadline elapsed"),
                );
                self.lose_guest();
                InvocationOutcome::Failure(classify(FailureSignals::new().with_timeout(budget)))
            }
        }
    }
}

#[async_trait]
impl Guest for GuestSupervisor {
    fn state(&self) -> GuestState {
        self.state
    }

    fn refresh(&mut self) {
        if self.state != GuestState::Ready {
            return;
        }
        let Some(process) = self.process.as_mut() else {
            return;
        };
        if let Some(exit) = process.exited() {
            let pid = process.pid();
            self.publish_exit(pid, &exit);
            self.lose_guest();
        }
    }

    async fn start(&mut self) -> Result<(), GuestError> {
        if self.state == GuestState::Ready {
            return Ok(());
        }
        self.await_restart_slot().await?;

        self.state = GuestState::Starting;
        self.starts = self.starts.saturating_add(1);
        self.bus
            .publish(Event::new(EventKind::GuestStarting).with_attempt(self.starts));

        let started = Instant::now();
        match GuestProcess::launch(&self.command, self.init_timeout, self.max_frame).await {
            Ok(process) => {
                self.bus.publish(
                    Event::new(EventKind::GuestReady)
                        .with_pid(process.pid())
                        .with_attempt(self.starts)
                        .with_duration(started.elapsed()),
                );
                self.process = Some(process);
                self.state = GuestState::Ready;
                Ok(())
            }
            Err(e) => {
                self.bus.publish(
                    Event::new(EventKind::GuestInitFailed)
                        .with_attempt(self.starts)
                        .with_reason(e.to_string()),
                );
                self.state = GuestState::Failed;
                Err(e)
            }
        }
    }

    async fn invoke(&mut self, inv: &Invocation) -> InvocationOutcome {
        if self.state != GuestState::Ready || self.process.is_none() {
            return InvocationOutcome::Failure(classify(
                FailureSignals::new().with_internal(format!("guest is {} instead of ready", self.state)),
            ));
        }
        self.state = GuestState::Invoking;
        let pid = self.pid();
        self.bus.publish(
            Event::new(EventKind::InvocationStarted)
                .with_request(inv.request_id.as_str())
                .with_pid(pid),
        );

        let frame = Frame::Invoke {
            header: InvokeHeader {
                request_id: inv.request_id.to_string(),
                deadline_ms: inv.deadline_ms(),
                headers: inv.headers.clone(),
            },
            payload: inv.payload.clone(),
        };
        let budget = inv.remaining();
        let deadline = Instant::now() + budget;

        let Some(process) = self.process.as_mut() else {
            self.state = GuestState::NotStarted;
            return InvocationOutcome::Failure(ErrorEnvelope::new(
                ErrorKind::InternalBridgeFault,
                "guest handle missing",
            ));
        };
        if let Err(e) = process.send(&frame).await {
            let exit = process.reap(WRITE_FAILURE_REAP).await;
            self.bus.publish(
                Event::new(EventKind::GuestExited)
                    .with_pid(pid)
                    .with_reason(format!("{exit} (write failed: {e})")),
            );
            self.lose_guest();
            return InvocationOutcome::Failure(classify(FailureSignals::new().with_exit(exit)));
        }

        let reply = process.reply(deadline).await;
        self.settle(reply, budget).await
    }

    async fn shutdown(&mut self) {
        let Some(mut process) = self.process.take() else {
            self.state = GuestState::NotStarted;
            return;
        };
        let pid = process.pid();
        let exited = process.shutdown(self.shutdown_grace).await;
        let ev = if exited {
            Event::new(EventKind::GuestExited).with_reason("shutdown requested")
        } else {
            Event::new(EventKind::GuestKilled).with_reason("shutdown grace elapsed")
        };
        self.bus.publish(ev.with_pid(pid));
        self.state = GuestState::NotStarted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::SystemTime;

    fn cfg(script: &str) -> Config {
        let mut cfg = Config::new(
            "127.0.0.1:9",
            GuestCommand::new("/bin/sh").arg("-c").arg(script),
        );
        cfg.init_timeout = Duration::from_secs(2);
        cfg
    }

    #[tokio::test]
    async fn test_init_failure_moves_to_failed() {
        let mut sup = GuestSupervisor::new(&cfg("exit 7"), Bus::new(16));
        assert_eq!(sup.state(), GuestState::NotStarted);

        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, GuestError::ExitedDuringInit { .. }));
        assert_eq!(sup.state(), GuestState::Failed);
    }

    #[tokio::test]
    async fn test_invoke_without_start_is_internal_fault() {
        let mut sup = GuestSupervisor::new(&cfg("exit 0"), Bus::new(16));
        let inv = Invocation::new("r-1", Bytes::new(), SystemTime::now() + Duration::from_secs(1));

        let outcome = sup.invoke(&inv).await;
        assert_eq!(outcome.error_type(), Some("InternalBridgeFault"));
        assert_eq!(sup.state(), GuestState::NotStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_budget_is_enforced() {
        let mut c = cfg("exit 0");
        c.restart.max_restarts = 2;
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let mut sup = GuestSupervisor::new(&c, bus);

        sup.streak = 3;
        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, GuestError::RestartsExhausted { restarts: 2 }));
        assert_eq!(sup.state(), GuestState::Failed);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::RestartsExhausted);

        // Still failed on the next attempt: the streak only resets on a healthy reply.
        assert!(sup.start().await.is_err());
    }
}
