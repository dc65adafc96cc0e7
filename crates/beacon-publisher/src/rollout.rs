//! Rollout policy: only the newest release of an application is published.
//!
//! The rollout cursor is never stored; it is recomputed on every check
//! from what is currently registered under the application's directory.
//! Once any instance of release N is registered, containers of older
//! releases stop being (re)published and their keys age out through TTL.

use std::sync::Arc;

use beacon_core::{ApplicationIdentity, KeyLayout};
use beacon_store::{KeyStore, Node};
use tracing::{debug, error};

#[derive(Clone)]
pub struct RolloutPolicy {
    store: Arc<dyn KeyStore>,
    layout: KeyLayout,
}

impl RolloutPolicy {
    pub fn new(store: Arc<dyn KeyStore>, layout: KeyLayout) -> Self {
        Self { store, layout }
    }

    /// Highest release currently registered for `app_name`, or 0 when
    /// nothing is (or the store cannot be read).
    pub async fn latest_running_version(&self, app_name: &str) -> u64 {
        let dir = self.layout.app_dir(app_name);
        match self.store.get(&dir, false).await {
            Ok(node) => highest_version(&node),
            Err(e) if e.is_not_found() => {
                debug!(app = %app_name, "no published instances");
                0
            }
            Err(e) => {
                error!(app = %app_name, error = %e, "failed to read rollout state");
                0
            }
        }
    }

    /// Whether an already-parsed container belongs to the newest release.
    /// Equal versions pass, so every instance of a release rolling out
    /// together is admitted.
    pub async fn admits(&self, identity: &ApplicationIdentity) -> bool {
        let highest = self.latest_running_version(&identity.app_name).await;
        let admitted = identity.version >= highest;
        if !admitted {
            debug!(
                app = %identity.app_name,
                version = identity.version,
                highest,
                "container superseded by newer release"
            );
        }
        admitted
    }

    /// Whether the container named `container_name` should be published.
    pub async fn is_publishable(&self, container_name: &str) -> bool {
        match ApplicationIdentity::parse(container_name) {
            Some(identity) => self.admits(&identity).await,
            None => false,
        }
    }
}

/// Maximum release among the children of an application directory.
/// Children that are not application containers are ignored.
pub fn highest_version(dir: &Node) -> u64 {
    dir.child_keys()
        .filter_map(ApplicationIdentity::from_key)
        .map(|id| id.version)
        .max()
        .unwrap_or(0)
}
