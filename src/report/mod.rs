//! Error reporting: envelope type and failure classification.
//!
//! - [`ErrorEnvelope`], [`ErrorKind`] the structured record sent upstream
//! - [`classify`], [`FailureSignals`], [`ExitInfo`] the pure mapping from raw
//!   failure signals to an envelope
//!
//! Called by the dispatcher and the guest supervisor on every failure path.
//! The control-plane client only transports finished envelopes.

mod classify;
mod envelope;

pub use classify::{ExitInfo, FailureSignals, classify};
pub use envelope::{ErrorEnvelope, ErrorKind};
