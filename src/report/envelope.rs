//! # Structured error envelope.
//!
//! Wire shape shared by the control plane's error endpoints and the guest
//! channel:
//! ```json
//! {"errorType": "GuestCrash", "errorMessage": "...", "stackTrace": ["..."]}
//! ```
//! `errorType` is never empty: an envelope decoded with an empty or missing
//! type is normalized to [`ErrorKind::GuestReportedError`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure classifications produced by the bridge itself.
///
/// Guest-reported errors keep the guest's own `errorType`; the
/// [`ErrorKind::GuestReportedError`] label is only a fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    GuestCrash,
    InvocationTimeout,
    MalformedPayload,
    GuestInitFailure,
    GuestReportedError,
    InternalBridgeFault,
}

impl ErrorKind {
    /// Stable `errorType` string sent upstream.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::GuestCrash => "GuestCrash",
            ErrorKind::InvocationTimeout => "InvocationTimeout",
            ErrorKind::MalformedPayload => "MalformedPayload",
            ErrorKind::GuestInitFailure => "GuestInitFailure",
            ErrorKind::GuestReportedError => "GuestReportedError",
            ErrorKind::InternalBridgeFault => "InternalBridgeFault",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error record reported for a failed invocation or initialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireEnvelope")]
pub struct ErrorEnvelope {
    #[serde(rename = "errorType")]
    error_type: String,
    #[serde(rename = "errorMessage")]
    error_message: String,
    #[serde(rename = "stackTrace")]
    stack_trace: Vec<String>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
    #[serde(rename = "stackTrace", default)]
    stack_trace: Option<Vec<String>>,
}

impl From<WireEnvelope> for ErrorEnvelope {
    fn from(w: WireEnvelope) -> Self {
        ErrorEnvelope::custom(
            w.error_type.unwrap_or_default(),
            w.error_message.unwrap_or_default(),
        )
        .with_stack_trace(w.stack_trace.unwrap_or_default())
    }
}

impl ErrorEnvelope {
    /// Envelope for one of the bridge's own classifications.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_type: kind.as_str().to_string(),
            error_message: message.into(),
            stack_trace: Vec::new(),
        }
    }

    /// Envelope with a caller-provided type; empty types fall back to `GuestReportedError`.
    pub fn custom(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error_type = error_type.into();
        if error_type.trim().is_empty() {
            error_type = ErrorKind::GuestReportedError.as_str().to_string();
        }
        Self {
            error_type,
            error_message: message.into(),
            stack_trace: Vec::new(),
        }
    }

    pub fn with_stack_trace(mut self, frames: Vec<String>) -> Self {
        self.stack_trace = frames;
        self
    }

    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn stack_trace(&self) -> &[String] {
        &self.stack_trace
    }

    /// `true` if this envelope carries the given bridge classification.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.error_type == kind.as_str()
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.error_message)
    }
}
