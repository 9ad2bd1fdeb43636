//! # Guest-side runtime.
//!
//! The other half of the guest channel, for guests written in Rust. A guest
//! connects to the socket named by `BRIDGE_GUEST_SOCKET`, announces readiness
//! and then answers `Invoke` frames one at a time until `Shutdown` or EOF.
//!
//! ```no_run
//! use bytes::Bytes;
//! use bridgevisor::guest::runtime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bridgevisor::GuestError> {
//!     runtime::serve(|_ctx, payload: Bytes| async move { Ok(payload) }).await
//! }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{GuestError, ProtocolError};
use crate::guest::protocol::{self, Frame, SOCKET_ENV};
use crate::report::ErrorEnvelope;

/// Largest frame a guest accepts from the bridge.
const GUEST_MAX_FRAME: usize = 64 * 1024 * 1024;

/// Invocation metadata handed to guest handlers.
#[derive(Clone, Debug)]
pub struct Context {
    pub request_id: String,
    pub deadline: SystemTime,
    pub headers: BTreeMap<String, String>,
}

impl Context {
    /// Time left before the bridge kills this guest.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }
}

/// Connected guest end of the channel.
pub struct Runtime {
    channel: Framed<UnixStream, LengthDelimitedCodec>,
}

impl Runtime {
    /// Connects to the socket named by `BRIDGE_GUEST_SOCKET`.
    pub async fn connect() -> Result<Self, GuestError> {
        let path = std::env::var_os(SOCKET_ENV).ok_or_else(|| {
            GuestError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{SOCKET_ENV} is not set"),
            ))
        })?;
        let stream = UnixStream::connect(path).await?;
        Ok(Self {
            channel: Framed::new(stream, protocol::codec(GUEST_MAX_FRAME)),
        })
    }

    async fn send(&mut self, frame: Frame) -> Result<(), GuestError> {
        self.channel.send(frame.encode()?).await?;
        Ok(())
    }

    /// Signals that initialization finished.
    pub async fn ready(&mut self) -> Result<(), GuestError> {
        self.send(Frame::Ready).await
    }

    /// Reports an initialization failure instead of readiness.
    pub async fn init_error(&mut self, envelope: ErrorEnvelope) -> Result<(), GuestError> {
        self.send(Frame::InitError(envelope)).await
    }

    /// Waits for the next invocation. `None` on `Shutdown` or when the bridge goes away.
    pub async fn next_invocation(&mut self) -> Result<Option<(Context, Bytes)>, GuestError> {
        let Some(body) = self.channel.next().await.transpose()? else {
            return Ok(None);
        };
        match Frame::decode(body.freeze())? {
            Frame::Invoke { header, payload } => {
                let ctx = Context {
                    request_id: header.request_id,
                    deadline: UNIX_EPOCH + Duration::from_millis(header.deadline_ms),
                    headers: header.headers,
                };
                Ok(Some((ctx, payload)))
            }
            Frame::Shutdown => Ok(None),
            other => Err(GuestError::Handshake(ProtocolError::Unexpected {
                expected: "Invoke",
                got: other.name(),
            })),
        }
    }

    pub async fn respond(&mut self, payload: Bytes) -> Result<(), GuestError> {
        self.send(Frame::Response(payload)).await
    }

    pub async fn fail(&mut self, envelope: ErrorEnvelope) -> Result<(), GuestError> {
        self.send(Frame::Error(envelope)).await
    }

    /// Writes an arbitrary frame body. Only useful for exercising the bridge's
    /// handling of broken guests.
    pub async fn send_raw(&mut self, body: Bytes) -> Result<(), GuestError> {
        self.channel.send(body).await?;
        Ok(())
    }
}

/// Connects, signals readiness and serves invocations with `handler` until shutdown.
pub async fn serve<F, Fut>(mut handler: F) -> Result<(), GuestError>
where
    F: FnMut(Context, Bytes) -> Fut,
    Fut: Future<Output = Result<Bytes, ErrorEnvelope>>,
{
    let mut rt = Runtime::connect().await?;
    rt.ready().await?;
    while let Some((ctx, payload)) = rt.next_invocation().await? {
        match handler(ctx, payload).await {
            Ok(out) => rt.respond(out).await?,
            Err(envelope) => rt.fail(envelope).await?,
        }
    }
    Ok(())
}
