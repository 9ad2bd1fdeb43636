//! # Platform shutdown signals.
//!
//! The platform stops a container with `SIGTERM` (and, interactively, `SIGINT`
//! or `SIGQUIT`). [`watch`] turns the first of those into a cancelled
//! [`CancellationToken`] and a `ShutdownRequested` event; the dispatcher
//! observes the token between invocations.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{Bus, Event, EventKind};

/// Completes when the process receives SIGINT, SIGTERM or SIGQUIT.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Spawns a task that cancels `token` on the first shutdown signal.
///
/// If signal handlers cannot be installed the bridge keeps running and only
/// an explicit `token.cancel()` stops it.
pub fn watch(bus: Bus, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            res = wait_for_shutdown_signal() => {
                match res {
                    Ok(()) => {
                        bus.publish(Event::new(EventKind::ShutdownRequested));
                        token.cancel();
                    }
                    Err(e) => {
                        tracing::warn!(target: "bridgevisor", error = %e, "signal handlers unavailable");
                        token.cancelled().await;
                    }
                }
            }
            _ = token.cancelled() => {}
        }
    })
}
