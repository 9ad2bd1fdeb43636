//! # Guest channel framing.
//!
//! Every message on the guest socket is one length-delimited frame
//! (`u32` big-endian length prefix, see [`codec`]). The frame body is:
//!
//! ```text
//! ┌─────┬──────────────────┬─────────────────┬───────────────┐
//! │ tag │ header_len (u32) │ header (JSON)   │ payload bytes │
//! │ u8  │ big-endian       │ header_len B    │ rest of frame │
//! └─────┴──────────────────┴─────────────────┴───────────────┘
//! ```
//!
//! | tag  | frame       | direction      | header          | payload      |
//! |------|-------------|----------------|-----------------|--------------|
//! | 0x01 | `Invoke`    | bridge → guest | [`InvokeHeader`]| event bytes  |
//! | 0x02 | `Shutdown`  | bridge → guest | none            | none         |
//! | 0x10 | `Ready`     | guest → bridge | none            | none         |
//! | 0x11 | `InitError` | guest → bridge | envelope        | none         |
//! | 0x12 | `Response`  | guest → bridge | none            | result bytes |
//! | 0x13 | `Error`     | guest → bridge | envelope        | none         |

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::ProtocolError;
use crate::report::ErrorEnvelope;

/// Environment variable carrying the socket path to the guest.
pub const SOCKET_ENV: &str = "BRIDGE_GUEST_SOCKET";

/// Room reserved for tag, header length and JSON header on top of the payload limit.
pub const HEADER_ALLOWANCE: usize = 64 * 1024;

const TAG_INVOKE: u8 = 0x01;
const TAG_SHUTDOWN: u8 = 0x02;
const TAG_READY: u8 = 0x10;
const TAG_INIT_ERROR: u8 = 0x11;
const TAG_RESPONSE: u8 = 0x12;
const TAG_ERROR: u8 = 0x13;

/// Builds the length-prefix codec shared by both ends of the channel.
///
/// Frames longer than `max_frame` fail with an `InvalidData` I/O error.
pub fn codec(max_frame: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame)
        .new_codec()
}

/// Per-invocation metadata sent with `Invoke`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeHeader {
    pub request_id: String,
    /// Deadline as Unix epoch milliseconds.
    pub deadline_ms: u64,
    /// Trace and context headers, forwarded verbatim.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// One decoded guest-channel message.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Invoke { header: InvokeHeader, payload: Bytes },
    Shutdown,
    Ready,
    InitError(ErrorEnvelope),
    Response(Bytes),
    Error(ErrorEnvelope),
}

impl Frame {
    /// Short name used in logs and protocol errors.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Invoke { .. } => "Invoke",
            Frame::Shutdown => "Shutdown",
            Frame::Ready => "Ready",
            Frame::InitError(_) => "InitError",
            Frame::Response(_) => "Response",
            Frame::Error(_) => "Error",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Frame::Invoke { .. } => TAG_INVOKE,
            Frame::Shutdown => TAG_SHUTDOWN,
            Frame::Ready => TAG_READY,
            Frame::InitError(_) => TAG_INIT_ERROR,
            Frame::Response(_) => TAG_RESPONSE,
            Frame::Error(_) => TAG_ERROR,
        }
    }

    /// Serializes the frame body (without the length prefix).
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let header = match self {
            Frame::Invoke { header, .. } => serde_json::to_vec(header)?,
            Frame::InitError(env) | Frame::Error(env) => serde_json::to_vec(env)?,
            Frame::Shutdown | Frame::Ready | Frame::Response(_) => Vec::new(),
        };
        let payload: &[u8] = match self {
            Frame::Invoke { payload, .. } | Frame::Response(payload) => payload,
            _ => &[],
        };

        let header_len =
            u32::try_from(header.len()).map_err(|_| ProtocolError::Truncated("header too long"))?;
        let mut buf = BytesMut::with_capacity(5 + header.len() + payload.len());
        buf.put_u8(self.tag());
        buf.put_u32(header_len);
        buf.put_slice(&header);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Parses a frame body produced by [`Frame::encode`].
    pub fn decode(mut body: Bytes) -> Result<Frame, ProtocolError> {
        if body.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let tag = body.get_u8();
        if !matches!(
            tag,
            TAG_INVOKE | TAG_SHUTDOWN | TAG_READY | TAG_INIT_ERROR | TAG_RESPONSE | TAG_ERROR
        ) {
            return Err(ProtocolError::UnknownTag(tag));
        }
        if body.remaining() < 4 {
            return Err(ProtocolError::Truncated("header length"));
        }
        let header_len = body.get_u32() as usize;
        if body.remaining() < header_len {
            return Err(ProtocolError::Truncated("header"));
        }
        let header = body.split_to(header_len);
        let payload = body;

        let frame = match tag {
            TAG_INVOKE => Frame::Invoke {
                header: serde_json::from_slice(&header)?,
                payload,
            },
            TAG_SHUTDOWN => Frame::Shutdown,
            TAG_READY => Frame::Ready,
            TAG_INIT_ERROR => Frame::InitError(serde_json::from_slice(&header)?),
            TAG_RESPONSE => Frame::Response(payload),
            _ => Frame::Error(serde_json::from_slice(&header)?),
        };
        Ok(frame)
    }
}
