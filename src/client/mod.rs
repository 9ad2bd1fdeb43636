//! Control-plane client.
//!
//! - [`ControlPlane`] the contract the dispatcher depends on
//! - [`HttpControlPlane`] the runtime-API implementation
//! - [`retry`] bounded retry with backoff for `next` polls

mod control_plane;
mod http;
pub mod retry;

pub use control_plane::ControlPlane;
pub use http::{
    API_VERSION, HEADER_DEADLINE_MS, HEADER_ERROR_TYPE, HEADER_REQUEST_ID, HttpControlPlane,
};
