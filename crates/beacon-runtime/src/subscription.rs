//! Event subscriptions.

use std::time::Duration;

use beacon_core::ContainerEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A live listener on the runtime's event stream.
///
/// Events arrive on a bounded channel fed either by a background task
/// (Docker) or directly by the emitter (in-memory runtime).
pub struct Subscription {
    events: mpsc::Receiver<ContainerEvent>,
    feeder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<ContainerEvent>, feeder: Option<JoinHandle<()>>) -> Self {
        Self { events, feeder }
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<ContainerEvent> {
        self.events.recv().await
    }

    /// Detach from the runtime after `grace`.
    ///
    /// The engine may still be delivering an event when we decide to
    /// stop; waiting briefly before closing the channel keeps it from
    /// writing into a listener that is already gone.
    pub async fn close(mut self, grace: Duration) {
        tokio::time::sleep(grace).await;
        self.events.close();
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        debug!("event subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}
