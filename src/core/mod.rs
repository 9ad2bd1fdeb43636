//! Runtime core: the invocation loop and its wiring.
//!
//! - [`dispatcher`]: pulls, forwards and reports one invocation at a time;
//! - [`bridge`]: owns the bus and subscribers, runs the dispatcher, flushes events;
//! - [`builder`]: validates config and wires the bridge;
//! - [`shutdown`]: platform signal handling.

mod bridge;
mod builder;
mod dispatcher;
mod shutdown;

pub use bridge::Bridge;
pub use builder::BridgeBuilder;
pub use dispatcher::{BridgeState, Dispatcher};
