//! # Dispatcher: the invocation loop.
//!
//! Pulls one invocation at a time from the [`ControlPlane`], hands it to the
//! [`Guest`] and routes the outcome back.
//!
//! ## Loop
//! ```text
//! cold start: guest.start() ── Err ──► report_init_error ──► Err(GuestInitFailure)
//!
//! loop {
//!   ├─► select { shutdown token → return Ok, client.next_invocation() }
//!   │       └─ Err(ControlPlaneUnreachable) → return Err   (nothing reported)
//!   ├─► publish InvocationReceived
//!   ├─► malformed?          → Failure(MalformedPayload)    (guest untouched)
//!   ├─► guest not Ready?    → guest.start()
//!   │       └─ Err → report_failure(GuestInitFailure) → return Err
//!   ├─► guest.invoke(inv)   → Success | Failure
//!   ├─► publish InvocationSucceeded / InvocationFailed
//!   └─► report_success / report_failure   (single attempt; error → ReportFailed)
//! }
//! ```
//!
//! ## Rules
//! - Exactly one report per received invocation, unless the bridge terminates first.
//! - Strictly one invocation in flight; delivery order is preserved.
//! - Shutdown is observed only between invocations: an in-flight invocation
//!   always completes and is reported.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::ControlPlane;
use crate::error::BridgeError;
use crate::events::{Bus, Event, EventKind};
use crate::guest::{Guest, GuestState};
use crate::invocation::{Invocation, InvocationOutcome, RequestId};
use crate::report::{ErrorEnvelope, FailureSignals, classify};

/// Mutable state owned by the loop: the guest (through its supervisor) and
/// the invocation counter.
pub struct BridgeState<G> {
    pub guest: G,
    invocations: u64,
}

impl<G: Guest> BridgeState<G> {
    pub fn new(guest: G) -> Self {
        Self {
            guest,
            invocations: 0,
        }
    }

    /// Number of invocations received so far.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    fn next_invocation(&mut self) -> u64 {
        self.invocations += 1;
        self.invocations
    }
}

/// Drives the invocation loop for one control plane and one guest.
pub struct Dispatcher<C, G> {
    client: C,
    state: BridgeState<G>,
    bus: Bus,
}

impl<C: ControlPlane, G: Guest> Dispatcher<C, G> {
    pub fn new(client: C, guest: G, bus: Bus) -> Self {
        Self {
            client,
            state: BridgeState::new(guest),
            bus,
        }
    }

    /// Runs until shutdown (`Ok`) or a fatal error, then stops the guest.
    ///
    /// Returns the loop result together with the final state.
    pub async fn run(mut self, token: CancellationToken) -> (Result<(), BridgeError>, BridgeState<G>) {
        let res = self.serve(&token).await;

        self.state.guest.shutdown().await;
        let label = match &res {
            Ok(()) => "shutdown",
            Err(e) => e.as_label(),
        };
        self.bus.publish(
            Event::new(EventKind::BridgeStopped)
                .with_invocation(self.state.invocations())
                .with_reason(label),
        );
        (res, self.state)
    }

    async fn serve(&mut self, token: &CancellationToken) -> Result<(), BridgeError> {
        let cold_start = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            res = self.state.guest.start() => res,
        };
        if let Err(e) = cold_start {
            let envelope = e.to_envelope();
            if let Err(re) = self.client.report_init_error(&envelope).await {
                self.publish_report_failed(None, re.to_string());
            }
            return Err(BridgeError::GuestInitFailure { envelope });
        }

        loop {
            let inv = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                next = self.client.next_invocation() => next?,
            };
            self.handle(inv).await?;
        }
    }

    /// Runs one invocation and reports it.
    async fn handle(&mut self, inv: Invocation) -> Result<(), BridgeError> {
        let n = self.state.next_invocation();
        self.bus.publish(
            Event::new(EventKind::InvocationReceived)
                .with_request(inv.request_id.as_str())
                .with_invocation(n)
                .with_timeout(inv.remaining()),
        );
        let started = Instant::now();

        let (outcome, fatal) = self.execute(&inv).await;

        let ev = match &outcome {
            InvocationOutcome::Success(_) => Event::new(EventKind::InvocationSucceeded),
            InvocationOutcome::Failure(env) => Event::new(EventKind::InvocationFailed)
                .with_error_type(env.error_type())
                .with_reason(env.error_message()),
        };
        self.bus.publish(
            ev.with_request(inv.request_id.as_str())
                .with_invocation(n)
                .with_duration(started.elapsed()),
        );

        self.report(&inv.request_id, outcome).await;
        match fatal {
            Some(envelope) => Err(BridgeError::GuestInitFailure { envelope }),
            None => Ok(()),
        }
    }

    /// Produces the outcome; the second value is set when the guest cannot be
    /// (re)started and the loop must end after reporting.
    async fn execute(&mut self, inv: &Invocation) -> (InvocationOutcome, Option<ErrorEnvelope>) {
        if let Some(reason) = &inv.malformed {
            let env = classify(FailureSignals::new().with_malformed(reason.to_string()));
            return (InvocationOutcome::Failure(env), None);
        }

        self.state.guest.refresh();
        if self.state.guest.state() != GuestState::Ready {
            if let Err(e) = self.state.guest.start().await {
                let env = e.to_envelope();
                return (InvocationOutcome::Failure(env.clone()), Some(env));
            }
        }
        (self.state.guest.invoke(inv).await, None)
    }

    async fn report(&mut self, id: &RequestId, outcome: InvocationOutcome) {
        let res = match &outcome {
            InvocationOutcome::Success(payload) => {
                self.client.report_success(id, payload.clone()).await
            }
            InvocationOutcome::Failure(env) => self.client.report_failure(id, env).await,
        };
        if let Err(e) = res {
            self.publish_report_failed(Some(id), e.to_string());
        }
    }

    fn publish_report_failed(&self, id: Option<&RequestId>, reason: String) {
        let mut ev = Event::new(EventKind::ReportFailed).with_reason(reason);
        if let Some(id) = id {
            ev = ev.with_request(id.as_str());
        }
        self.bus.publish(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, GuestError};
    use crate::report::{ErrorKind, ExitInfo};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, SystemTime};

    #[derive(Clone, Debug, PartialEq)]
    enum Report {
        Success(String, Bytes),
        Failure(String, String),
        InitError(String),
    }

    /// Serves scripted invocations, then reports the control plane as unreachable.
    #[derive(Clone, Default)]
    struct FakePlane {
        queue: Arc<Mutex<VecDeque<Invocation>>>,
        reports: Arc<Mutex<Vec<Report>>>,
    }

    impl FakePlane {
        fn with(invocations: Vec<Invocation>) -> Self {
            let plane = Self::default();
            plane.queue.lock().unwrap().extend(invocations);
            plane
        }

        fn reports(&self) -> Vec<Report> {
            self.reports.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ControlPlane for FakePlane {
        async fn next_invocation(&self) -> Result<Invocation, BridgeError> {
            let next = self.queue.lock().unwrap().pop_front();
            next.ok_or(BridgeError::ControlPlaneUnreachable {
                attempts: 1,
                last_error: "queue drained".into(),
            })
        }

        async fn report_success(&self, id: &RequestId, payload: Bytes) -> Result<(), ClientError> {
            self.reports
                .lock()
                .unwrap()
                .push(Report::Success(id.to_string(), payload));
            Ok(())
        }

        async fn report_failure(
            &self,
            id: &RequestId,
            envelope: &ErrorEnvelope,
        ) -> Result<(), ClientError> {
            self.reports.lock().unwrap().push(Report::Failure(
                id.to_string(),
                envelope.error_type().to_string(),
            ));
            Ok(())
        }

        async fn report_init_error(&self, envelope: &ErrorEnvelope) -> Result<(), ClientError> {
            self.reports
                .lock()
                .unwrap()
                .push(Report::InitError(envelope.error_type().to_string()));
            Ok(())
        }
    }

    /// In-memory guest: payload `crash` kills it, `slow` times out, anything else echoes.
    struct FakeGuest {
        state: GuestState,
        starts: Arc<Mutex<u32>>,
        fail_start_after: Option<u32>,
        in_flight: Arc<Mutex<u32>>,
    }

    impl FakeGuest {
        fn new() -> Self {
            Self {
                state: GuestState::NotStarted,
                starts: Arc::default(),
                fail_start_after: None,
                in_flight: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Guest for FakeGuest {
        fn state(&self) -> GuestState {
            self.state
        }

        async fn start(&mut self) -> Result<(), GuestError> {
            let mut starts = self.starts.lock().unwrap();
            if self.fail_start_after.is_some_and(|n| *starts >= n) {
                self.state = GuestState::Failed;
                return Err(GuestError::ExitedDuringInit {
                    exit: ExitInfo::code(1),
                });
            }
            *starts += 1;
            self.state = GuestState::Ready;
            Ok(())
        }

        async fn invoke(&mut self, inv: &Invocation) -> InvocationOutcome {
            assert_eq!(self.state, GuestState::Ready);
            {
                let mut n = self.in_flight.lock().unwrap();
                *n += 1;
                assert_eq!(*n, 1, "two invocations in flight");
            }
            let outcome = match inv.payload.as_ref() {
                b"crash" => {
                    self.state = GuestState::NotStarted;
                    InvocationOutcome::Failure(classify(
                        FailureSignals::new().with_exit(ExitInfo::code(2)),
                    ))
                }
                b"slow" => {
                    self.state = GuestState::NotStarted;
                    InvocationOutcome::Failure(classify(
                        FailureSignals::new().with_timeout(Duration::from_secs(1)),
                    ))
                }
                other => InvocationOutcome::Success(Bytes::copy_from_slice(other)),
            };
            *self.in_flight.lock().unwrap() -= 1;
            outcome
        }

        async fn shutdown(&mut self) {
            self.state = GuestState::NotStarted;
        }
    }

    fn inv(id: &str, payload: &'static str) -> Invocation {
        Invocation::new(
            id,
            Bytes::from_static(payload.as_bytes()),
            SystemTime::now() + Duration::from_secs(30),
        )
    }

    async fn run(plane: FakePlane, guest: FakeGuest) -> (Result<(), BridgeError>, u64) {
        let (res, state) = Dispatcher::new(plane, guest, Bus::new(64))
            .run(CancellationToken::new())
            .await;
        (res, state.invocations())
    }

    #[tokio::test]
    async fn test_every_invocation_gets_exactly_one_report_in_order() {
        let plane = FakePlane::with(vec![inv("a", "1"), inv("b", "crash"), inv("c", "3")]);
        let (res, served) = run(plane.clone(), FakeGuest::new()).await;

        assert!(matches!(res, Err(BridgeError::ControlPlaneUnreachable { .. })));
        assert_eq!(served, 3);
        assert_eq!(
            plane.reports(),
            vec![
                Report::Success("a".into(), Bytes::from_static(b"1")),
                Report::Failure("b".into(), "GuestCrash".into()),
                Report::Success("c".into(), Bytes::from_static(b"3")),
            ]
        );
    }

    #[tokio::test]
    async fn test_crash_restarts_guest_once_before_next_invocation() {
        let guest = FakeGuest::new();
        let starts = Arc::clone(&guest.starts);
        let plane = FakePlane::with(vec![inv("a", "crash"), inv("b", "ok")]);

        run(plane.clone(), guest).await;
        assert_eq!(*starts.lock().unwrap(), 2);
        assert_eq!(plane.reports()[1], Report::Success("b".into(), Bytes::from_static(b"ok")));
    }

    #[tokio::test]
    async fn test_timeout_is_reported_and_guest_restarted() {
        let guest = FakeGuest::new();
        let starts = Arc::clone(&guest.starts);
        let plane = FakePlane::with(vec![inv("a", "slow"), inv("b", "ok")]);

        run(plane.clone(), guest).await;
        assert_eq!(plane.reports()[0], Report::Failure("a".into(), "InvocationTimeout".into()));
        assert_eq!(*starts.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_malformed_invocation_skips_guest() {
        let guest = FakeGuest::new();
        let starts = Arc::clone(&guest.starts);
        let bad = inv("a", "x").with_malformed(crate::invocation::Malformed::InvalidDeadline(
            "soon".into(),
        ));
        let plane = FakePlane::with(vec![bad, inv("b", "ok")]);

        run(plane.clone(), guest).await;
        assert_eq!(plane.reports()[0], Report::Failure("a".into(), "MalformedPayload".into()));
        assert_eq!(*starts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cold_start_failure_reports_init_error() {
        let mut guest = FakeGuest::new();
        guest.fail_start_after = Some(0);
        let plane = FakePlane::with(vec![inv("a", "1")]);

        let (res, served) = run(plane.clone(), guest).await;
        match res {
            Err(BridgeError::GuestInitFailure { envelope }) => {
                assert!(envelope.is(ErrorKind::GuestInitFailure))
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(served, 0);
        assert_eq!(plane.reports(), vec![Report::InitError("GuestInitFailure".into())]);
    }

    #[tokio::test]
    async fn test_restart_failure_reports_pending_invocation_and_stops() {
        let mut guest = FakeGuest::new();
        guest.fail_start_after = Some(1);
        let plane = FakePlane::with(vec![inv("a", "crash"), inv("b", "1"), inv("c", "1")]);

        let (res, served) = run(plane.clone(), guest).await;
        assert!(matches!(res, Err(BridgeError::GuestInitFailure { .. })));
        assert_eq!(served, 2);
        assert_eq!(
            plane.reports(),
            vec![
                Report::Failure("a".into(), "GuestCrash".into()),
                Report::Failure("b".into(), "GuestInitFailure".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_control_plane_reports_nothing() {
        let plane = FakePlane::default();
        let (res, served) = run(plane.clone(), FakeGuest::new()).await;

        assert_eq!(res.unwrap_err().exit_code(), 1);
        assert_eq!(served, 0);
        assert!(plane.reports().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_cleanly() {
        let token = CancellationToken::new();
        token.cancel();
        let (res, state) = Dispatcher::new(FakePlane::with(vec![inv("a", "1")]), FakeGuest::new(), Bus::new(8))
            .run(token)
            .await;
        assert!(res.is_ok());
        assert_eq!(state.invocations(), 0);
    }
}
