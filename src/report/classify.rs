//! # Failure classification.
//!
//! [`classify`] turns the raw signals collected while an invocation failed into
//! exactly one [`ErrorEnvelope`]. Several signals can be present at once (a
//! guest that writes garbage and then exits produces both a malformed frame and
//! an exit status); the winner is chosen by a fixed precedence:
//!
//! ```text
//! guest-reported error > timeout > process crash > malformed payload > internal fault
//! ```
//!
//! The platform and its tooling key behavior off `errorType`, so the order is
//! part of the contract.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use super::envelope::{ErrorEnvelope, ErrorKind};

/// How the guest process ended, as far as the bridge could observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// The channel closed but no exit status could be collected.
    pub const CHANNEL_CLOSED: ExitInfo = ExitInfo {
        code: None,
        signal: None,
    };

    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "guest process exited with status {code}"),
            (None, Some(sig)) => write!(f, "guest process terminated by signal {sig}"),
            (None, None) => f.write_str("guest channel closed unexpectedly"),
        }
    }
}

/// Raw failure signals gathered for one invocation.
#[derive(Clone, Debug, Default)]
pub struct FailureSignals {
    pub guest_error: Option<ErrorEnvelope>,
    pub timed_out: Option<Duration>,
    pub exit: Option<ExitInfo>,
    pub malformed: Option<String>,
    pub internal: Option<String>,
}

impl FailureSignals {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_guest_error(mut self, env: ErrorEnvelope) -> Self {
        self.guest_error = Some(env);
        self
    }

    #[inline]
    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.timed_out = Some(budget);
        self
    }

    #[inline]
    pub fn with_exit(mut self, exit: ExitInfo) -> Self {
        self.exit = Some(exit);
        self
    }

    #[inline]
    pub fn with_malformed(mut self, reason: impl Into<String>) -> Self {
        self.malformed = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_internal(mut self, reason: impl Into<String>) -> Self {
        self.internal = Some(reason.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.guest_error.is_none()
            && self.timed_out.is_none()
            && self.exit.is_none()
            && self.malformed.is_none()
            && self.internal.is_none()
    }
}

/// Maps failure signals to a single envelope using the fixed precedence.
pub fn classify(signals: FailureSignals) -> ErrorEnvelope {
    if let Some(env) = signals.guest_error {
        return env;
    }
    if let Some(budget) = signals.timed_out {
        return ErrorEnvelope::new(
            ErrorKind::InvocationTimeout,
            format!("invocation timed out after {:.2} seconds", budget.as_secs_f64()),
        );
    }
    if let Some(exit) = signals.exit {
        return ErrorEnvelope::new(ErrorKind::GuestCrash, exit.to_string());
    }
    if let Some(reason) = signals.malformed {
        return ErrorEnvelope::new(ErrorKind::MalformedPayload, reason);
    }
    let reason = signals
        .internal
        .unwrap_or_else(|| "unclassified failure".to_string());
    ErrorEnvelope::new(ErrorKind::InternalBridgeFault, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_beats_malformed() {
        let env = classify(
            FailureSignals::new()
                .with_malformed("unknown frame tag 0x7f")
                .with_exit(ExitInfo::code(3)),
        );
        assert!(env.is(ErrorKind::GuestCrash));
        assert_eq!(env.error_message(), "guest process exited with status 3");
    }

    #[test]
    fn test_timeout_beats_crash() {
        let env = classify(
            FailureSignals::new()
                .with_exit(ExitInfo::signal(9))
                .with_timeout(Duration::from_millis(1500)),
        );
        assert!(env.is(ErrorKind::InvocationTimeout));
        assert_eq!(env.error_message(), "invocation timed out after 1.50 seconds");
    }

    #[test]
    fn test_guest_error_beats_everything() {
        let guest = ErrorEnvelope::custom("ValueError", "n must be positive");
        let env = classify(
            FailureSignals::new()
                .with_internal("x")
                .with_malformed("y")
                .with_exit(ExitInfo::code(1))
                .with_timeout(Duration::from_secs(1))
                .with_guest_error(guest.clone()),
        );
        assert_eq!(env, guest);
    }

    #[test]
    fn test_malformed_beats_internal() {
        let env = classify(FailureSignals::new().with_internal("x").with_malformed("bad"));
        assert!(env.is(ErrorKind::MalformedPayload));
    }

    #[test]
    fn test_no_signals_is_internal_fault() {
        let signals = FailureSignals::new();
        assert!(signals.is_empty());
        let env = classify(signals);
        assert!(env.is(ErrorKind::InternalBridgeFault));
        assert!(!env.error_type().is_empty());
    }

    #[test]
    fn test_exit_info_messages() {
        assert_eq!(
            ExitInfo::signal(9).to_string(),
            "guest process terminated by signal 9"
        );
        assert_eq!(
            ExitInfo::CHANNEL_CLOSED.to_string(),
            "guest channel closed unexpectedly"
        );
    }
}
