use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::BridgeError,
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
};

use super::bridge::Bridge;

/// Builder for a [`Bridge`] with optional event subscribers.
pub struct BridgeBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl BridgeBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (invocations, guest lifecycle,
    /// retries) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds one subscriber.
    pub fn subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Validates the configuration and wires the event bus and subscriber workers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Bridge, BridgeError> {
        self.cfg.validate()?;

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        Ok(Bridge::new_internal(
            self.cfg,
            bus,
            subs,
            CancellationToken::new(),
        ))
    }
}
