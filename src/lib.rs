//! # bridgevisor
//!
//! **bridgevisor** is a custom runtime bridge for function platforms.
//!
//! It runs inside a function container, polls the platform's invocation
//! control plane, hands each invocation to a guest process running user
//! handler code in any language, and reports the result or a structured
//! error back. Payloads are opaque bytes; the bridge knows nothing about the
//! guest's language.
//!
//! ## Architecture
//! ```text
//!   control plane (HTTP, 2018-06-01)
//!        ▲      │ next / response / error / init-error
//!        │      ▼
//! ┌────────────────────┐   publish   ┌───────┐   ┌───────────────┐
//! │  HttpControlPlane  │────────────►│       │   │ SubscriberSet │──► LogWriter, ...
//! └────────┬───────────┘             │       │   └───────▲───────┘
//!          │ Invocation              │  Bus  │──listener─┘
//!          ▼                         │       │
//! ┌────────────────────┐  publish    │       │
//! │     Dispatcher     │────────────►│       │
//! └────────┬───────────┘             │       │
//!          │ invoke / start          │       │
//!          ▼                         │       │
//! ┌────────────────────┐  publish    │       │
//! │  GuestSupervisor   │────────────►│       │
//! └────────┬───────────┘             └───────┘
//!          │ length-delimited frames over a Unix socket
//!          ▼
//!     guest process (stdout/stderr inherited)
//! ```
//!
//! ### Invocation lifecycle
//! ```text
//! next_invocation() ─► malformed? ─► report MalformedPayload
//!        │
//!        ▼
//! guest Ready? ── no ─► start() ── fails ─► report GuestInitFailure, exit 1
//!        │
//!        ▼
//! invoke(): Response        → Ready     → report_success
//!           Error envelope  → Ready     → report_failure(guest errorType)
//!           exit / EOF      → NotStarted→ report_failure(GuestCrash)
//!           deadline        → kill      → report_failure(InvocationTimeout)
//! ```
//!
//! ## Features
//! | Area             | Description                                                       | Key types                              |
//! |------------------|-------------------------------------------------------------------|----------------------------------------|
//! | **Control plane**| Poll with bounded retry, single-attempt reports                   | [`ControlPlane`], [`HttpControlPlane`] |
//! | **Supervision**  | Explicit FSM, handshake, watchdog, bounded restarts               | [`Guest`], [`GuestSupervisor`]         |
//! | **Errors**       | Deterministic classification into one envelope                    | [`ErrorEnvelope`], [`classify`]        |
//! | **Policies**     | Restart budget, backoff with jitter                               | [`RestartPolicy`], [`BackoffPolicy`]   |
//! | **Observability**| Events fanned out to subscribers                                  | [`Event`], [`Subscribe`], [`LogWriter`]|
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use bridgevisor::{BridgeBuilder, Config, GuestCommand, LogWriter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bridgevisor::BridgeError> {
//!     let guest = GuestCommand::new("python3").arg("bootstrap.py").handler("app.handler");
//!     let cfg = Config::new("127.0.0.1:9001", guest);
//!
//!     BridgeBuilder::new(cfg)
//!         .subscriber(Arc::new(LogWriter::new()))
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod client;
mod config;
mod core;
mod error;
pub mod events;
pub mod guest;
mod invocation;
pub mod policies;
pub mod report;
pub mod subscribers;

pub use client::{ControlPlane, HttpControlPlane};
pub use config::{Config, GuestCommand};
pub use crate::core::{Bridge, BridgeBuilder, BridgeState, Dispatcher};
pub use error::{BridgeError, ClientError, GuestError, ProtocolError};
pub use events::{Bus, Event, EventKind};
pub use guest::{Guest, GuestState, GuestSupervisor};
pub use invocation::{Invocation, InvocationOutcome, Malformed, RequestId};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use report::{ErrorEnvelope, ErrorKind, ExitInfo, FailureSignals, classify};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
