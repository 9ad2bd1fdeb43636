use std::time::{Duration, SystemTime};

use bytes::Bytes;

use bridgevisor::{
    Bus, Config, EventKind, Guest, GuestCommand, GuestState, GuestSupervisor, Invocation,
    InvocationOutcome,
};

fn supervisor(bus: &Bus) -> GuestSupervisor {
    let guest = GuestCommand::new(env!("CARGO_BIN_EXE_reference-guest"));
    let mut cfg = Config::new("127.0.0.1:9", guest);
    cfg.shutdown_grace = Duration::from_secs(2);
    GuestSupervisor::new(&cfg, bus.clone())
}

fn invocation(id: &str, payload: &'static str, budget: Duration) -> Invocation {
    Invocation::new(id, Bytes::from_static(payload.as_bytes()), SystemTime::now() + budget)
}

fn drain_kinds(rx: &mut tokio::sync::broadcast::Receiver<bridgevisor::Event>) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev.kind);
    }
    kinds
}

#[tokio::test]
async fn test_state_machine_follows_invocation_results() {
    let bus = Bus::new(256);
    let mut sup = supervisor(&bus);

    sup.start().await.unwrap();
    assert_eq!(sup.state(), GuestState::Ready);
    let first_pid = sup.pid();
    assert!(first_pid.is_some());

    let ok = sup
        .invoke(&invocation("1", r#"{"n":12}"#, Duration::from_secs(5)))
        .await;
    assert_eq!(ok, InvocationOutcome::Success(Bytes::from_static(br#"{"result":144}"#)));
    assert_eq!(sup.state(), GuestState::Ready);

    let crash = sup
        .invoke(&invocation("2", r#"{"action":"crash","code":9}"#, Duration::from_secs(5)))
        .await;
    assert_eq!(crash.error_type(), Some("GuestCrash"));
    assert_eq!(sup.state(), GuestState::NotStarted);
    assert_eq!(sup.streak(), 1);

    sup.start().await.unwrap();
    assert_ne!(sup.pid(), first_pid);
    let ok = sup
        .invoke(&invocation("3", r#"{"n":2}"#, Duration::from_secs(5)))
        .await;
    assert!(ok.is_success());
    assert_eq!(sup.streak(), 0);
}

#[tokio::test]
async fn test_deadline_kills_hung_guest() {
    let bus = Bus::new(256);
    let mut rx = bus.subscribe();
    let mut sup = supervisor(&bus);
    sup.start().await.unwrap();

    let started = std::time::Instant::now();
    let outcome = sup
        .invoke(&invocation("h", r#"{"action":"hang"}"#, Duration::from_millis(250)))
        .await;

    assert_eq!(outcome.error_type(), Some("InvocationTimeout"));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(sup.state(), GuestState::NotStarted);

    let kinds = drain_kinds(&mut rx);
    assert!(kinds.contains(&EventKind::TimeoutHit));
    assert!(kinds.contains(&EventKind::GuestKilled));
}

#[tokio::test]
async fn test_guest_error_keeps_guest_ready() {
    let bus = Bus::new(64);
    let mut sup = supervisor(&bus);
    sup.start().await.unwrap();

    let outcome = sup
        .invoke(&invocation("e", r#"{"action":"error","n":1}"#, Duration::from_secs(5)))
        .await;
    assert_eq!(outcome.error_type(), Some("ValueError"));
    assert_eq!(sup.state(), GuestState::Ready);
}

#[tokio::test]
async fn test_undecodable_reply_drops_guest_channel() {
    let bus = Bus::new(256);
    let mut rx = bus.subscribe();
    let mut sup = supervisor(&bus);
    sup.start().await.unwrap();
    let first_pid = sup.pid();

    let bad = sup
        .invoke(&invocation("a", r#"{"action":"garbage_then_reply","n":1}"#, Duration::from_secs(5)))
        .await;
    assert_eq!(bad.error_type(), Some("MalformedPayload"));
    assert_eq!(sup.state(), GuestState::NotStarted);
    assert!(drain_kinds(&mut rx).contains(&EventKind::GuestKilled));

    sup.start().await.unwrap();
    assert_ne!(sup.pid(), first_pid);
    let next = sup
        .invoke(&invocation("b", r#"{"n":2}"#, Duration::from_secs(5)))
        .await;
    assert_eq!(next, InvocationOutcome::Success(Bytes::from_static(br#"{"result":4}"#)));
}

#[tokio::test]
async fn test_shutdown_lets_guest_exit_on_its_own() {
    let bus = Bus::new(64);
    let mut rx = bus.subscribe();
    let mut sup = supervisor(&bus);
    sup.start().await.unwrap();

    sup.shutdown().await;
    assert_eq!(sup.state(), GuestState::NotStarted);
    assert!(sup.pid().is_none());

    let kinds = drain_kinds(&mut rx);
    assert!(kinds.contains(&EventKind::GuestExited));
    assert!(!kinds.contains(&EventKind::GuestKilled));
}

#[tokio::test]
async fn test_hung_init_times_out() {
    let bus = Bus::new(64);
    let guest = GuestCommand::new(env!("CARGO_BIN_EXE_reference-guest"))
        .env("REFERENCE_GUEST_INIT", "hang");
    let mut cfg = Config::new("127.0.0.1:9", guest);
    cfg.init_timeout = Duration::from_millis(300);
    let mut sup = GuestSupervisor::new(&cfg, bus);

    let err = sup.start().await.unwrap_err();
    assert_eq!(err.as_label(), "guest_handshake_timeout");
    assert_eq!(sup.state(), GuestState::Failed);
}
