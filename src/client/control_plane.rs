//! # Control-plane contract.
//!
//! [`ControlPlane`] is the seam between the dispatcher and the platform. The
//! production implementation is [`HttpControlPlane`](crate::HttpControlPlane);
//! tests substitute in-memory fakes.
//!
//! ## Contract
//! - `next_invocation` blocks until the platform has work. It owns the retry
//!   budget: an error means the control plane is unreachable and the bridge
//!   must terminate without reporting anything.
//! - The three report calls are single attempts. A returned error is logged by
//!   the caller and the loop moves on; a stuck report would block every
//!   future invocation.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BridgeError, ClientError};
use crate::invocation::{Invocation, RequestId};
use crate::report::ErrorEnvelope;

/// Protocol client for the invocation control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    /// Waits for the next invocation, retrying transient failures.
    ///
    /// Fails only with [`BridgeError::ControlPlaneUnreachable`].
    async fn next_invocation(&self) -> Result<Invocation, BridgeError>;

    /// Submits a success payload for `id`.
    async fn report_success(&self, id: &RequestId, payload: Bytes) -> Result<(), ClientError>;

    /// Submits a failure envelope for `id`.
    async fn report_failure(&self, id: &RequestId, envelope: &ErrorEnvelope)
    -> Result<(), ClientError>;

    /// Reports that the guest failed to initialize before any invocation was received.
    async fn report_init_error(&self, envelope: &ErrorEnvelope) -> Result<(), ClientError>;
}
