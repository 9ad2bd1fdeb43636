//! # Invocations and their outcomes.
//!
//! An [`Invocation`] is one unit of work delivered by the control plane. The
//! dispatcher owns it for exactly one loop iteration and drops it once the
//! matching [`InvocationOutcome`] has been submitted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::report::ErrorEnvelope;

/// Platform-assigned invocation identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Why an invocation was rejected before reaching the guest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Malformed {
    /// The deadline header was present but not a valid epoch-millisecond value.
    InvalidDeadline(String),
    /// The payload exceeded the configured maximum.
    PayloadTooLarge { size: usize, limit: usize },
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::InvalidDeadline(raw) => write!(f, "invalid deadline header {raw:?}"),
            Malformed::PayloadTooLarge { size, limit } => {
                write!(f, "payload of {size} bytes exceeds limit of {limit} bytes")
            }
        }
    }
}

/// One function invocation.
///
/// `headers` carries trace and context headers verbatim; the bridge never
/// interprets them, it only forwards them to the guest.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub request_id: RequestId,
    pub payload: Bytes,
    /// Absolute time after which the platform considers the invocation timed out.
    pub deadline: SystemTime,
    pub headers: BTreeMap<String, String>,
    /// Set when the request could be identified but not accepted.
    pub malformed: Option<Malformed>,
}

impl Invocation {
    pub fn new(request_id: impl Into<RequestId>, payload: impl Into<Bytes>, deadline: SystemTime) -> Self {
        Self {
            request_id: request_id.into(),
            payload: payload.into(),
            deadline,
            headers: BTreeMap::new(),
            malformed: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_malformed(mut self, reason: Malformed) -> Self {
        self.malformed = Some(reason);
        self
    }

    /// Time left until the deadline (zero if already past).
    pub fn remaining(&self) -> Duration {
        self.deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    /// Deadline as Unix epoch milliseconds, the form used on both wires.
    pub fn deadline_ms(&self) -> u64 {
        self.deadline
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(0)
    }
}

/// Result of exactly one invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum InvocationOutcome {
    Success(Bytes),
    Failure(ErrorEnvelope),
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Success(_))
    }

    /// `errorType` of a failure, `None` for success.
    pub fn error_type(&self) -> Option<&str> {
        match self {
            InvocationOutcome::Success(_) => None,
            InvocationOutcome::Failure(env) => Some(env.error_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_is_zero_past_deadline() {
        let inv = Invocation::new("a", Bytes::new(), UNIX_EPOCH + Duration::from_secs(1));
        assert_eq!(inv.remaining(), Duration::ZERO);
        assert_eq!(inv.deadline_ms(), 1000);
    }

    #[test]
    fn test_remaining_counts_down_from_future_deadline() {
        let inv = Invocation::new("b", Bytes::new(), SystemTime::now() + Duration::from_secs(30));
        let left = inv.remaining();
        assert!(left > Duration::from_secs(29) && left <= Duration::from_secs(30));
    }

    #[test]
    fn test_malformed_display() {
        let m = Malformed::PayloadTooLarge { size: 10, limit: 4 };
        assert_eq!(m.to_string(), "payload of 10 bytes exceeds limit of 4 bytes");
    }
}
