//! Publish and retract procedures.
//!
//! `Publisher` ties the runtime, the store, the rollout policy, the
//! reachability probe and the registration table together. Both duty
//! cycles (events and polling, see `cycle.rs`) go through the methods
//! here, concurrently and without coordinating with each other:
//! publishing is idempotent and retraction only touches keys recorded in
//! the registration table.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{ApplicationIdentity, Container, KeyLayout, PublisherConfig};
use beacon_runtime::ContainerRuntime;
use beacon_store::KeyStore;
use tracing::{debug, error, info, info_span, trace, Span};

use crate::error::PublisherError;
use crate::probe;
use crate::registry::Registrations;
use crate::rollout::RolloutPolicy;

/// What happened to one container name during a publish pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Endpoint written and recorded.
    Published,
    /// Name does not follow the application naming scheme.
    NotApplication,
    /// The container publishes no ports.
    NoPorts,
    /// A newer release is already registered.
    Superseded,
    /// Nothing accepted connections on the candidate address.
    Unreachable,
    /// The endpoint write was rejected by the store.
    WriteFailed,
}

/// What happened when retracting a stopped container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractOutcome {
    /// The container was never published; nothing to do.
    NotRegistered,
    /// Key deleted and record dropped.
    Retracted,
    /// The delete failed; the record is kept.
    Failed,
}

/// Tally of one full publish pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    pub containers: u32,
    pub published: u32,
    pub superseded: u32,
    pub unreachable: u32,
    pub skipped: u32,
    pub failed: u32,
    /// The runtime listing itself failed; nothing was evaluated.
    pub list_failed: bool,
}

impl PollStats {
    fn record(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Published => self.published += 1,
            PublishOutcome::Superseded => self.superseded += 1,
            PublishOutcome::Unreachable => self.unreachable += 1,
            PublishOutcome::NotApplication | PublishOutcome::NoPorts => self.skipped += 1,
            PublishOutcome::WriteFailed => self.failed += 1,
        }
    }
}

/// The publisher core. Cheap to clone; clones share the registration table.
#[derive(Clone)]
pub struct Publisher {
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn KeyStore>,
    rollout: RolloutPolicy,
    registrations: Registrations,
    layout: KeyLayout,
    /// Advertised address of this host.
    host: String,
    /// TTL in seconds for endpoint keys and application directories.
    publish_ttl: u64,
    probe_timeout: Duration,
    pub(crate) span: Span,
}

impl Publisher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn KeyStore>,
        config: &PublisherConfig,
    ) -> Self {
        let layout = config.layout();
        Self {
            runtime,
            rollout: RolloutPolicy::new(store.clone(), layout.clone()),
            store,
            registrations: Registrations::new(),
            layout,
            host: config.host.clone(),
            publish_ttl: config.publish_ttl_secs(),
            probe_timeout: config.probe_timeout,
            span: info_span!("publisher", host = %config.host),
        }
    }

    /// Replace the span both duty cycles log under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn registrations(&self) -> &Registrations {
        &self.registrations
    }

    pub fn rollout(&self) -> &RolloutPolicy {
        &self.rollout
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Publish every name of `container` that passes the rollout and
    /// reachability gates.
    ///
    /// Only the lowest published port is considered; one key holds one
    /// address. The rollout check runs before the probe because it is a
    /// single store read while the probe may wait out a connect timeout.
    pub async fn publish_container(&self, container: &Container) -> Vec<PublishOutcome> {
        let mut outcomes = Vec::with_capacity(container.names.len());
        for name in container.clean_names() {
            let outcome = self.publish_name(container, name).await;
            trace!(container = %container.id, %name, ?outcome, "publish evaluated");
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn publish_name(&self, container: &Container, name: &str) -> PublishOutcome {
        let Some(identity) = ApplicationIdentity::parse(name) else {
            return PublishOutcome::NotApplication;
        };
        let Some(port) = container.lowest_port() else {
            return PublishOutcome::NoPorts;
        };

        let app_path = KeyLayout::app_path(&identity.app_name, name);
        let key = self.layout.key_for_path(&app_path);
        let dir = self.layout.app_dir(&identity.app_name);
        let address = format!("{}:{port}", self.host);

        if !self.rollout.admits(&identity).await {
            return PublishOutcome::Superseded;
        }
        if !probe::is_open(&address, self.probe_timeout).await {
            return PublishOutcome::Unreachable;
        }

        debug!(%key, %address, "set");
        if let Err(e) = self.store.set(&key, &address, self.publish_ttl).await {
            error!(%key, error = %e, "failed to publish endpoint");
            return PublishOutcome::WriteFailed;
        }

        // The directory was created by the write above if it was missing;
        // a failed refresh only risks the directory expiring early, and
        // the next pass refreshes it again.
        debug!(%dir, "update dir");
        if let Err(e) = self.store.update_dir(&dir, self.publish_ttl).await {
            error!(%dir, error = %e, "failed to refresh application directory");
        }

        self.registrations
            .record_published(&container.id, app_path)
            .await;
        PublishOutcome::Published
    }

    /// Resolve a container by ID and publish it.
    pub async fn publish_by_id(
        &self,
        container_id: &str,
    ) -> Result<Vec<PublishOutcome>, PublisherError> {
        let container = self.runtime.find_container(container_id).await?;
        Ok(self.publish_container(&container).await)
    }

    /// Retract the key a stopped container was published under.
    ///
    /// Containers that were never recorded (they failed a gate, or were
    /// never application containers) are ignored without touching the
    /// store. A failed delete keeps the record so the entry still
    /// reflects a key that may exist; the key then ages out via TTL.
    pub async fn retract(&self, container_id: &str) -> RetractOutcome {
        let Some(registration) = self.registrations.entry(container_id).await else {
            trace!(container = %container_id, "stopped container was not published");
            return RetractOutcome::NotRegistered;
        };

        let key = self.layout.key_for_path(&registration.app_path);
        info!(%key, "stopped");
        match self.store.delete(&key, false).await {
            Ok(()) => {
                self.forget_retracted(container_id, registration.generation)
                    .await;
                RetractOutcome::Retracted
            }
            Err(e) if e.is_not_found() => {
                debug!(%key, "endpoint already expired");
                self.forget_retracted(container_id, registration.generation)
                    .await;
                RetractOutcome::Retracted
            }
            Err(e) => {
                error!(%key, error = %e, "failed to retract endpoint");
                RetractOutcome::Failed
            }
        }
    }

    /// Drop the record read at the start of a retraction, unless a
    /// concurrent publish has re-recorded the container since. In that case
    /// the newer record describes a key that was written after our delete.
    async fn forget_retracted(&self, container_id: &str, generation: u64) {
        if !self.registrations.forget_if(container_id, generation).await {
            debug!(container = %container_id, "container re-published during retraction");
        }
    }

    /// List every container and run the publish procedure on each.
    pub async fn publish_all(&self) -> PollStats {
        let mut stats = PollStats::default();
        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "failed to list containers");
                stats.list_failed = true;
                return stats;
            }
        };

        for container in &containers {
            stats.containers += 1;
            for outcome in self.publish_container(container).await {
                stats.record(outcome);
            }
        }
        stats
    }
}
