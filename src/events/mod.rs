//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Dispatcher`, `GuestSupervisor`, `client::retry`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the bridge's listener task (fans out to `SubscriberSet`),
//!   and tests that subscribe directly to assert ordering.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
