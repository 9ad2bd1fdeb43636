//! In-process fake of the function control plane.
//!
//! Serves queued invocations from `next`; once the queue is empty it either
//! answers 503 (so the bridge exhausts its retry budget and exits) or holds
//! the request open, like the real platform between invocations.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::sync::Notify;

use bridgevisor::{BackoffPolicy, Config, GuestCommand, RestartPolicy};

#[derive(Clone, Debug)]
pub struct Queued {
    pub id: String,
    pub payload: Bytes,
    /// Raw `Lambda-Runtime-Deadline-Ms` value; `None` omits the header.
    pub deadline: Option<String>,
    pub extra: Vec<(&'static str, &'static str)>,
}

impl Queued {
    pub fn new(id: &str, payload: &str) -> Self {
        Self {
            id: id.to_string(),
            payload: Bytes::from(payload.to_string()),
            deadline: Some(deadline_in(Duration::from_secs(10))),
            extra: Vec::new(),
        }
    }

    pub fn deadline(mut self, raw: Option<String>) -> Self {
        self.deadline = raw;
        self
    }

    pub fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.extra.push((name, value));
        self
    }
}

pub fn deadline_in(d: Duration) -> String {
    let at = SystemTime::now() + d;
    at.duration_since(UNIX_EPOCH).unwrap().as_millis().to_string()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Response,
    Error,
    InitError,
}

#[derive(Clone, Debug)]
pub struct Report {
    pub kind: Kind,
    pub id: Option<String>,
    pub body: Bytes,
    pub error_type_header: Option<String>,
}

impl Report {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("report body is JSON")
    }

    pub fn error_type(&self) -> String {
        self.json()["errorType"].as_str().unwrap_or_default().to_string()
    }
}

#[derive(Clone, Default)]
struct PlaneState {
    queue: Arc<Mutex<VecDeque<Queued>>>,
    reports: Arc<Mutex<Vec<Report>>>,
    polls: Arc<Mutex<u32>>,
    hold_when_empty: bool,
    reported: Arc<Notify>,
}

pub struct FakePlane {
    pub addr: SocketAddr,
    state: PlaneState,
}

impl FakePlane {
    pub async fn start(invocations: Vec<Queued>) -> Self {
        Self::spawn(invocations, false).await
    }

    /// Like [`FakePlane::start`] but `next` blocks forever once the queue is drained.
    pub async fn start_holding(invocations: Vec<Queued>) -> Self {
        Self::spawn(invocations, true).await
    }

    async fn spawn(invocations: Vec<Queued>, hold_when_empty: bool) -> Self {
        let state = PlaneState {
            hold_when_empty,
            ..PlaneState::default()
        };
        state.queue.lock().unwrap().extend(invocations);

        let app = Router::new()
            .route("/2018-06-01/runtime/invocation/next", get(next))
            .route("/2018-06-01/runtime/invocation/:id/response", post(response))
            .route("/2018-06-01/runtime/invocation/:id/error", post(error))
            .route("/2018-06-01/runtime/init/error", post(init_error))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn reports(&self) -> Vec<Report> {
        self.state.reports.lock().unwrap().clone()
    }

    pub fn polls(&self) -> u32 {
        *self.state.polls.lock().unwrap()
    }

    /// Waits until at least `n` reports have been recorded.
    pub async fn wait_for_reports(&self, n: usize) {
        loop {
            let notified = self.state.reported.notified();
            if self.state.reports.lock().unwrap().len() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Config pointing at this plane and running the reference guest.
    pub fn config(&self) -> Config {
        config_for(&self.addr.to_string())
    }
}

pub fn config_for(runtime_api: &str) -> Config {
    let mut cfg = Config::new(runtime_api, reference_guest());
    cfg.init_timeout = Duration::from_secs(10);
    cfg.poll_retries = 1;
    cfg.poll_backoff = BackoffPolicy::immediate();
    cfg.restart = RestartPolicy {
        max_restarts: 3,
        backoff: BackoffPolicy::immediate(),
    };
    cfg.shutdown_grace = Duration::from_millis(200);
    cfg
}

pub fn reference_guest() -> GuestCommand {
    GuestCommand::new(env!("CARGO_BIN_EXE_reference-guest")).handler("square.handler")
}

async fn next(State(s): State<PlaneState>) -> Response {
    *s.polls.lock().unwrap() += 1;
    let item = s.queue.lock().unwrap().pop_front();
    let Some(inv) = item else {
        if s.hold_when_empty {
            std::future::pending::<()>().await;
        }
        return (StatusCode::SERVICE_UNAVAILABLE, "no more work").into_response();
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        "lambda-runtime-aws-request-id",
        HeaderValue::from_str(&inv.id).unwrap(),
    );
    if let Some(raw) = &inv.deadline {
        headers.insert("lambda-runtime-deadline-ms", HeaderValue::from_str(raw).unwrap());
    }
    for (name, value) in inv.extra {
        headers.insert(name, HeaderValue::from_static(value));
    }
    (StatusCode::OK, headers, inv.payload).into_response()
}

fn record(s: &PlaneState, report: Report) {
    s.reports.lock().unwrap().push(report);
    s.reported.notify_waiters();
}

fn error_type_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("lambda-runtime-function-error-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn response(State(s): State<PlaneState>, Path(id): Path<String>, body: Bytes) -> StatusCode {
    record(
        &s,
        Report {
            kind: Kind::Response,
            id: Some(id),
            body,
            error_type_header: None,
        },
    );
    StatusCode::ACCEPTED
}

async fn error(
    State(s): State<PlaneState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    record(
        &s,
        Report {
            kind: Kind::Error,
            id: Some(id),
            body,
            error_type_header: error_type_header(&headers),
        },
    );
    StatusCode::ACCEPTED
}

async fn init_error(State(s): State<PlaneState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    record(
        &s,
        Report {
            kind: Kind::InitError,
            id: None,
            body,
            error_type_header: error_type_header(&headers),
        },
    );
    StatusCode::ACCEPTED
}
