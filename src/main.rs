use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bridgevisor::{BridgeBuilder, BridgeError, Config, GuestCommand, LogWriter};

/// Custom runtime bridge: polls the function control plane and supervises the guest handler process.
#[derive(Parser, Debug)]
#[command(name = "bridgevisor", version, about)]
struct Args {
    /// Control-plane address (host:port).
    #[arg(long, env = "AWS_LAMBDA_RUNTIME_API")]
    runtime_api: String,

    /// Handler entry point, forwarded to the guest as `_HANDLER`.
    #[arg(long, env = "_HANDLER", default_value = "")]
    handler: String,

    /// Guest command line, used when no trailing command is given.
    #[arg(long = "guest-command", env = "BRIDGE_GUEST_COMMAND")]
    guest_command: Option<String>,

    /// Maximum time from spawn to guest readiness, in milliseconds.
    #[arg(long, env = "BRIDGE_INIT_TIMEOUT_MS", default_value_t = 10_000)]
    init_timeout_ms: u64,

    /// Budget for invocations without a deadline header, in milliseconds.
    #[arg(long, env = "BRIDGE_DEFAULT_TIMEOUT_MS", default_value_t = 3_000)]
    default_timeout_ms: u64,

    /// Extra attempts for a failed next-invocation poll.
    #[arg(long, env = "BRIDGE_POLL_RETRIES", default_value_t = 5)]
    poll_retries: u32,

    /// Consecutive guest restarts allowed without a healthy reply (0 = unlimited).
    #[arg(long, env = "BRIDGE_MAX_RESTARTS", default_value_t = 5)]
    max_restarts: u32,

    /// Largest accepted payload, in bytes.
    #[arg(long, env = "BRIDGE_MAX_PAYLOAD_BYTES", default_value_t = 6 * 1024 * 1024)]
    max_payload_bytes: usize,

    /// Time the guest gets to exit after a shutdown request, in milliseconds.
    #[arg(long, env = "BRIDGE_SHUTDOWN_GRACE_MS", default_value_t = 500)]
    shutdown_grace_ms: u64,

    /// Guest program and arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "GUEST_CMD")]
    guest: Vec<String>,
}

impl Args {
    fn guest_command(&self) -> anyhow::Result<GuestCommand> {
        let cmd = match self.guest.split_first() {
            Some((program, args)) => GuestCommand {
                program: program.clone(),
                args: args.to_vec(),
                ..GuestCommand::default()
            },
            None => self
                .guest_command
                .as_deref()
                .and_then(GuestCommand::parse)
                .context("no guest command: pass it after the flags or set BRIDGE_GUEST_COMMAND")?,
        };
        Ok(cmd.handler(self.handler.clone()))
    }

    fn into_config(self) -> anyhow::Result<Config> {
        let guest = self.guest_command()?;
        let mut cfg = Config::new(self.runtime_api, guest);
        cfg.init_timeout = Duration::from_millis(self.init_timeout_ms);
        cfg.default_timeout = Duration::from_millis(self.default_timeout_ms);
        cfg.poll_retries = self.poll_retries;
        cfg.restart.max_restarts = self.max_restarts;
        cfg.max_payload_bytes = self.max_payload_bytes;
        cfg.shutdown_grace = Duration::from_millis(self.shutdown_grace_ms);
        Ok(cfg)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bridgevisor=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cfg = match Args::parse().into_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(target: "bridgevisor", "invalid configuration: {e:#}");
            return ExitCode::from(2);
        }
    };

    let bridge = match BridgeBuilder::new(cfg)
        .subscriber(Arc::new(LogWriter::new()))
        .build()
    {
        Ok(bridge) => bridge,
        Err(e) => return fail(e),
    };

    match bridge.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn fail(e: BridgeError) -> ExitCode {
    tracing::error!(
        target: "bridgevisor",
        error = e.as_label(),
        details = %e.as_message(),
        "bridge terminated"
    );
    ExitCode::from(e.exit_code())
}
