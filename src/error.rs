//! Error types used by the bridge runtime.
//!
//! - [`BridgeError`] fatal errors that terminate the bridge process.
//! - [`ClientError`] a single control-plane request failed.
//! - [`GuestError`] the guest process could not be started or talked to.
//! - [`ProtocolError`] a guest-channel frame could not be decoded.
//!
//! Recoverable invocation failures never surface as Rust errors past the
//! dispatcher: they become an [`ErrorEnvelope`] and are reported upstream.
//! Each enum provides `as_label` (stable snake_case, for logs) and
//! `as_message`.

use std::time::Duration;

use thiserror::Error;

use crate::report::{ErrorEnvelope, ExitInfo};

/// # Fatal errors of the bridge runtime.
///
/// Returning one of these from [`Bridge::run`](crate::Bridge::run) means the
/// container is unhealthy and the process must exit non-zero.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The next-invocation endpoint could not be reached within the retry budget.
    #[error("control plane unreachable after {attempts} attempts: {last_error}")]
    ControlPlaneUnreachable {
        /// Total attempts made, including the first.
        attempts: u32,
        /// Rendering of the last client error.
        last_error: String,
    },

    /// The guest could not be started (or restarted) and no invocation can be served.
    #[error("guest initialization failed: {envelope}")]
    GuestInitFailure {
        /// Envelope already reported to the control plane.
        envelope: ErrorEnvelope,
    },

    /// Startup configuration is unusable.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl BridgeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use bridgevisor::BridgeError;
    ///
    /// let err = BridgeError::ControlPlaneUnreachable { attempts: 6, last_error: "refused".into() };
    /// assert_eq!(err.as_label(), "control_plane_unreachable");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BridgeError::ControlPlaneUnreachable { .. } => "control_plane_unreachable",
            BridgeError::GuestInitFailure { .. } => "guest_init_failure",
            BridgeError::Config { .. } => "invalid_config",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            BridgeError::ControlPlaneUnreachable {
                attempts,
                last_error,
            } => format!("attempts={attempts} last_error={last_error}"),
            BridgeError::GuestInitFailure { envelope } => {
                format!("type={} message={}", envelope.error_type(), envelope.error_message())
            }
            BridgeError::Config { reason } => reason.clone(),
        }
    }

    /// Process exit code for this error. Always non-zero.
    pub fn exit_code(&self) -> u8 {
        match self {
            BridgeError::ControlPlaneUnreachable { .. } | BridgeError::GuestInitFailure { .. } => 1,
            BridgeError::Config { .. } => 2,
        }
    }
}

/// # Errors of a single control-plane request.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection, timeout, or body transfer failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// A required response header was absent.
    #[error("missing header {0}")]
    MissingHeader(&'static str),

    /// The endpoint address could not be turned into a URL.
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),
}

impl ClientError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ClientError::Transport(_) => "client_transport",
            ClientError::Status { .. } => "client_status",
            ClientError::MissingHeader(_) => "client_missing_header",
            ClientError::InvalidEndpoint(_) => "client_invalid_endpoint",
        }
    }

    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// # Errors talking to the guest process outside of a normal invocation outcome.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GuestError {
    /// The guest command was empty.
    #[error("no guest command configured")]
    NoCommand,

    /// The guest process could not be spawned.
    #[error("failed to spawn guest {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Socket setup or channel I/O failed.
    #[error("guest channel i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The guest did not connect and signal readiness in time.
    #[error("guest did not become ready within {timeout:?}")]
    HandshakeTimeout { timeout: Duration },

    /// The guest exited before completing the handshake.
    #[error("guest exited during initialization: {exit}")]
    ExitedDuringInit { exit: ExitInfo },

    /// The guest reported its own initialization error.
    #[error("guest reported init error: {0}")]
    InitRejected(ErrorEnvelope),

    /// The guest sent something other than a readiness frame during handshake.
    #[error("handshake protocol violation: {0}")]
    Handshake(#[from] ProtocolError),

    /// Consecutive restarts exceeded the configured budget.
    #[error("restart budget exhausted after {restarts} consecutive restarts")]
    RestartsExhausted { restarts: u32 },
}

impl GuestError {
    pub fn as_label(&self) -> &'static str {
        match self {
            GuestError::NoCommand => "guest_no_command",
            GuestError::Spawn { .. } => "guest_spawn",
            GuestError::Io(_) => "guest_io",
            GuestError::HandshakeTimeout { .. } => "guest_handshake_timeout",
            GuestError::ExitedDuringInit { .. } => "guest_exited_during_init",
            GuestError::InitRejected(_) => "guest_init_rejected",
            GuestError::Handshake(_) => "guest_handshake",
            GuestError::RestartsExhausted { .. } => "guest_restarts_exhausted",
        }
    }

    /// Envelope reported upstream for this init-time failure.
    ///
    /// A guest-supplied init error is passed through unchanged.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            GuestError::InitRejected(env) => env.clone(),
            other => ErrorEnvelope::new(
                crate::report::ErrorKind::GuestInitFailure,
                other.to_string(),
            ),
        }
    }
}

/// # Guest-channel frame decoding errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("unknown frame tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("frame truncated: {0}")]
    Truncated(&'static str),

    #[error("invalid frame header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("unexpected frame {got} while waiting for {expected}")]
    Unexpected {
        expected: &'static str,
        got: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ErrorKind;

    #[test]
    fn test_exit_codes_are_non_zero() {
        let errs = [
            BridgeError::ControlPlaneUnreachable {
                attempts: 1,
                last_error: "x".into(),
            },
            BridgeError::GuestInitFailure {
                envelope: ErrorEnvelope::new(ErrorKind::GuestInitFailure, "x"),
            },
            BridgeError::Config { reason: "x".into() },
        ];
        for e in errs {
            assert_ne!(e.exit_code(), 0, "{}", e.as_label());
        }
    }

    #[test]
    fn test_init_rejection_passes_guest_envelope_through() {
        let env = ErrorEnvelope::custom("ImportError", "no module named handler");
        assert_eq!(GuestError::InitRejected(env.clone()).to_envelope(), env);
    }

    #[test]
    fn test_other_guest_errors_become_init_failure() {
        let env = GuestError::HandshakeTimeout {
            timeout: Duration::from_secs(1),
        }
        .to_envelope();
        assert!(env.is(ErrorKind::GuestInitFailure));
    }
}
