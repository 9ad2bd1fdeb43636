//! Guest process side of the bridge.
//!
//! - [`protocol`] frame layout of the Unix-socket channel
//! - [`process`] one spawned guest and its channel
//! - [`supervisor`] the lifecycle state machine ([`Guest`], [`GuestSupervisor`])
//! - [`runtime`] the guest-side half of the channel, for Rust guests

pub mod process;
pub mod protocol;
pub mod runtime;
mod supervisor;

pub use supervisor::{Guest, GuestState, GuestSupervisor};
