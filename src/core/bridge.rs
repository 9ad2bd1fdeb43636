//! # Bridge: wires the control-plane client, the guest supervisor and event delivery.
//!
//! The [`Bridge`] owns the event bus, a [`SubscriberSet`] and the runtime
//! configuration. [`Bridge::run`] builds the production components from the
//! config; [`Bridge::run_with`] accepts any [`ControlPlane`] and [`Guest`].
//!
//! ```text
//! Bridge::run_with(client, guest)
//!   ├─► subscriber_listener(): Bus.subscribe() ─► SubscriberSet::emit(&Event)
//!   ├─► shutdown::watch(): SIGTERM/SIGINT/SIGQUIT ─► token.cancel()
//!   ├─► Dispatcher::run(token)            (until shutdown or fatal error)
//!   └─► flush: drain the bus, close subscriber queues, wait for workers
//!
//! Event flow:
//!   Dispatcher / GuestSupervisor / HttpControlPlane ── publish ──► Bus
//!        ──► listener ──► SubscriberSet ──► [queue] ──► worker ──► LogWriter, ...
//! ```

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{ControlPlane, HttpControlPlane};
use crate::config::Config;
use crate::core::{dispatcher::Dispatcher, shutdown};
use crate::error::BridgeError;
use crate::events::Bus;
use crate::guest::{Guest, GuestSupervisor};
use crate::subscribers::SubscriberSet;

/// One bridge instance: configuration, event bus and subscribers.
pub struct Bridge {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    token: CancellationToken,
}

impl Bridge {
    pub(crate) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            bus,
            subs,
            token,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Event bus shared by every component of this bridge.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Token that stops the loop between invocations when cancelled.
    ///
    /// Cancelled automatically on SIGINT, SIGTERM or SIGQUIT.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Runs with the HTTP control-plane client and a process-backed guest.
    pub async fn run(self) -> Result<(), BridgeError> {
        let client = HttpControlPlane::new(&self.cfg, self.bus.clone()).map_err(|e| {
            BridgeError::Config {
                reason: e.to_string(),
            }
        })?;
        let guest = GuestSupervisor::new(&self.cfg, self.bus.clone());
        self.run_with(client, guest).await
    }

    /// Runs the invocation loop until shutdown (`Ok`) or a fatal error.
    pub async fn run_with<C, G>(self, client: C, guest: G) -> Result<(), BridgeError>
    where
        C: ControlPlane,
        G: Guest,
    {
        let stop = CancellationToken::new();
        let listener = self.subscriber_listener(stop.clone());
        let signals = shutdown::watch(self.bus.clone(), self.token.clone());

        let (res, _state) = Dispatcher::new(client, guest, self.bus.clone())
            .run(self.token.clone())
            .await;

        signals.abort();
        stop.cancel();
        let _ = listener.await;
        if let Ok(subs) = Arc::try_unwrap(self.subs) {
            subs.shutdown().await;
        }
        res
    }

    /// Forwards bus events to the subscriber set until `stop`, then drains what is left.
    fn subscriber_listener(&self, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => set.emit(&ev),
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
        })
    }
}
