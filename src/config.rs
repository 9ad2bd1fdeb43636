//! # Bridge configuration.
//!
//! [`Config`] centralizes every knob of the bridge. The binary fills it from
//! command-line flags backed by environment variables (see `main.rs`); tests
//! build it directly.
//!
//! ## Sentinel values
//! - `restart.max_restarts = 0` → unlimited consecutive restarts
//! - `default_timeout = 0s` → invocations without a deadline header use a
//!   zero budget and time out immediately; keep it non-zero

use std::path::PathBuf;
use std::time::Duration;

use crate::error::BridgeError;
use crate::policies::{BackoffPolicy, RestartPolicy};

/// How to launch the guest process.
#[derive(Clone, Debug, Default)]
pub struct GuestCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Handler entry point, forwarded to the guest as `_HANDLER`.
    pub handler: String,
    /// Working directory (`None` = inherit).
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for the guest.
    pub env: Vec<(String, String)>,
}

impl GuestCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Splits a whitespace-separated command line into program and arguments.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            ..Self::default()
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = handler.into();
        self
    }
}

/// Global configuration for one bridge instance.
#[derive(Clone, Debug)]
pub struct Config {
    /// Control-plane address as `host:port` (the `AWS_LAMBDA_RUNTIME_API` value).
    pub runtime_api: String,

    /// Guest launch description.
    pub guest: GuestCommand,

    /// Maximum time from spawn to the guest's readiness frame.
    pub init_timeout: Duration,

    /// Budget for invocations that arrive without a deadline header.
    pub default_timeout: Duration,

    /// Extra attempts for a failed `next` poll before the control plane is
    /// declared unreachable (total attempts = `poll_retries + 1`).
    pub poll_retries: u32,

    /// Delay schedule between failed polls.
    pub poll_backoff: BackoffPolicy,

    /// Bound on consecutive guest restarts.
    pub restart: RestartPolicy,

    /// Largest accepted invocation payload and guest frame, in bytes.
    pub max_payload_bytes: usize,

    /// Time given to the guest to exit after a `Shutdown` frame before it is killed.
    pub shutdown_grace: Duration,

    /// Per-request HTTP timeout for report calls (`next` has none: it blocks until work arrives).
    pub report_timeout: Duration,

    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
}

impl Config {
    /// Creates a config with defaults for everything but the two required inputs.
    pub fn new(runtime_api: impl Into<String>, guest: GuestCommand) -> Self {
        Self {
            runtime_api: runtime_api.into(),
            guest,
            ..Self::default()
        }
    }

    /// Total number of `next` attempts, including the first.
    #[inline]
    pub fn poll_attempts(&self) -> u32 {
        self.poll_retries.saturating_add(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Rejects configurations the bridge cannot run with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.runtime_api.trim().is_empty() {
            return Err(BridgeError::Config {
                reason: "control-plane address is empty".into(),
            });
        }
        if self.guest.program.trim().is_empty() {
            return Err(BridgeError::Config {
                reason: "guest command is empty".into(),
            });
        }
        if self.init_timeout.is_zero() {
            return Err(BridgeError::Config {
                reason: "init timeout must be greater than zero".into(),
            });
        }
        if self.max_payload_bytes == 0 {
            return Err(BridgeError::Config {
                reason: "max payload size must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `init_timeout = 10s`
    /// - `default_timeout = 3s` (the platform's default function timeout)
    /// - `poll_retries = 5`, `poll_backoff = BackoffPolicy::default()`
    /// - `restart = RestartPolicy::default()` (5 consecutive restarts)
    /// - `max_payload_bytes = 6 MiB`
    /// - `shutdown_grace = 500ms`
    /// - `report_timeout = 30s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            runtime_api: String::new(),
            guest: GuestCommand::default(),
            init_timeout: Duration::from_secs(10),
            default_timeout: Duration::from_secs(3),
            poll_retries: 5,
            poll_backoff: BackoffPolicy::default(),
            restart: RestartPolicy::default(),
            max_payload_bytes: 6 * 1024 * 1024,
            shutdown_grace: Duration::from_millis(500),
            report_timeout: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guest_command_line() {
        let cmd = GuestCommand::parse("  python3 -u bootstrap.py ").unwrap();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["-u", "bootstrap.py"]);
        assert!(GuestCommand::parse("   ").is_none());
    }

    #[test]
    fn test_validate_rejects_missing_inputs() {
        assert!(Config::default().validate().is_err());
        assert!(Config::new("127.0.0.1:9001", GuestCommand::default()).validate().is_err());
        assert!(Config::new("127.0.0.1:9001", GuestCommand::new("node")).validate().is_ok());
    }

    #[test]
    fn test_poll_attempts_include_first() {
        let mut cfg = Config::default();
        cfg.poll_retries = 0;
        assert_eq!(cfg.poll_attempts(), 1);
        cfg.poll_retries = u32::MAX;
        assert_eq!(cfg.poll_attempts(), u32::MAX);
    }
}
