//! The two duty cycles: runtime events and periodic re-scan.
//!
//! They share the publisher's collaborators and registration table but
//! never wait on each other. A `stop` racing a poll pass can let a dead
//! container be republished once; that entry then lives for at most one
//! TTL, since nothing refreshes it afterwards.

use std::time::Duration;

use beacon_core::{ContainerEvent, EventStatus};
use beacon_runtime::Subscription;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::PublisherError;
use crate::publisher::{PollStats, Publisher};

/// Pause before detaching from the runtime on shutdown, so an event the
/// engine is already delivering has somewhere to land.
pub const UNSUBSCRIBE_GRACE: Duration = Duration::from_millis(10);

/// Pause before re-subscribing after the event stream ends on its own.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

impl Publisher {
    /// Run the event cycle until `shutdown` flips (or its sender is dropped).
    ///
    /// Fails only if the initial subscription cannot be established. An
    /// event already being handled when shutdown arrives is finished
    /// before the loop exits.
    pub async fn listen(&self, shutdown: watch::Receiver<bool>) -> Result<(), PublisherError> {
        let span = self.span.clone();
        self.listen_inner(shutdown).instrument(span).await
    }

    async fn listen_inner(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PublisherError> {
        let mut subscription = self
            .runtime
            .subscribe()
            .await
            .map_err(PublisherError::Subscribe)?;
        info!("listening for container events");

        if *shutdown.borrow_and_update() {
            subscription.close(UNSUBSCRIBE_GRACE).await;
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!("event cycle shutting down");
                    break;
                }
                event = subscription.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("runtime event stream ended");
                        match self.resubscribe(&mut shutdown).await {
                            Some(fresh) => subscription = fresh,
                            None => return Ok(()),
                        }
                    }
                }
            }
        }

        subscription.close(UNSUBSCRIBE_GRACE).await;
        info!("event cycle stopped");
        Ok(())
    }

    /// Keep trying to subscribe until it works or shutdown is requested.
    async fn resubscribe(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Subscription> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return None,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
            match self.runtime.subscribe().await {
                Ok(subscription) => {
                    info!("resubscribed to container events");
                    return Some(subscription);
                }
                Err(e) => error!(error = %e, "failed to resubscribe to container events"),
            }
        }
    }

    /// Dispatch a single runtime event.
    pub async fn handle_event(&self, event: ContainerEvent) {
        match event.status {
            EventStatus::Start => {
                if let Err(e) = self.publish_by_id(&event.container_id).await {
                    error!(container = %event.container_id, error = %e, "failed to resolve started container");
                }
            }
            EventStatus::Stop => {
                self.retract(&event.container_id).await;
            }
            EventStatus::Other(_) => {}
        }
    }

    /// Run the poll cycle until `shutdown` flips (or its sender is dropped).
    ///
    /// Each tick spawns an independent publish pass; a slow pass is not
    /// awaited before the next tick. The first pass starts immediately.
    pub async fn run_poll_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let publisher = self.clone();
                    tokio::spawn(
                        async move {
                            publisher.poll_once().await;
                        }
                        .instrument(self.span.clone()),
                    );
                }
                _ = shutdown.changed() => {
                    debug!("poll cycle shutting down");
                    break;
                }
            }
        }
    }

    /// One full re-scan: list every container and publish each.
    pub async fn poll_once(&self) -> PollStats {
        let stats = self.publish_all().await;
        debug!(
            containers = stats.containers,
            published = stats.published,
            superseded = stats.superseded,
            unreachable = stats.unreachable,
            skipped = stats.skipped,
            failed = stats.failed,
            "poll pass complete"
        );
        stats
    }
}
