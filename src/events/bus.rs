//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. The dispatcher,
//! the guest supervisor and the control-plane client publish to it; the
//! bridge's listener fans events out to the [`SubscriberSet`](crate::SubscriberSet).
//!
//! ```text
//! Dispatcher ──┐
//! Supervisor ──┼──► Bus ──► listener (Bridge) ──► SubscriberSet ──► LogWriter, ...
//! Client     ──┘
//! ```
//!
//! ## Rules
//! - `publish()` never blocks the invocation loop.
//! - Bounded ring buffer; slow receivers observe `Lagged(n)` and skip.
//! - Events published with no receiver are dropped.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers (fire-and-forget).
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver for events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(1024)
    }
}
