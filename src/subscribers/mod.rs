//! # Event subscribers.
//!
//! ```text
//! Dispatcher ── publish(Event) ──► Bus ──► listener ──► SubscriberSet
//!                                                           ├──► LogWriter (tracing)
//!                                                           └──► custom (metrics, probes)
//! ```
//!
//! ## Implementing a subscriber
//! ```no_run
//! use bridgevisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct CrashCounter;
//!
//! #[async_trait]
//! impl Subscribe for CrashCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::GuestExited {
//!             // bump a counter
//!         }
//!     }
//! }
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
