//! Registration table mapping each container to the store key it was published under.
//!
//! This is the only state the publisher keeps in memory, and the only
//! authority consulted when a container stops: a key is deleted only if
//! the container it belongs to is recorded here. The lock guards map
//! mutation only; callers perform store I/O outside of it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::trace;

/// One recorded publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// `<app>/<container-name>`.
    pub app_path: String,
    /// Bumped on every record, so a retraction can tell whether the entry
    /// it read is still the one in the table.
    pub generation: u64,
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, Registration>,
    next_generation: u64,
}

/// Container ID → `<app>/<container-name>`. Clones share the same table.
#[derive(Clone, Default)]
pub struct Registrations {
    table: Arc<RwLock<Table>>,
}

impl Registrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `container_id` is published at `app_path`.
    pub async fn record_published(&self, container_id: &str, app_path: String) -> u64 {
        let mut table = self.table.write().await;
        table.next_generation += 1;
        let generation = table.next_generation;
        trace!(container = %container_id, path = %app_path, generation, "registration recorded");
        table.entries.insert(
            container_id.to_string(),
            Registration {
                app_path,
                generation,
            },
        );
        generation
    }

    /// Path a container was published under, if any.
    pub async fn lookup(&self, container_id: &str) -> Option<String> {
        self.entry(container_id).await.map(|r| r.app_path)
    }

    /// Full record for a container, if any.
    pub async fn entry(&self, container_id: &str) -> Option<Registration> {
        let table = self.table.read().await;
        table.entries.get(container_id).cloned()
    }

    /// Drop a container's record. Returns the path it held.
    pub async fn forget(&self, container_id: &str) -> Option<String> {
        let mut table = self.table.write().await;
        table.entries.remove(container_id).map(|r| r.app_path)
    }

    /// Drop a container's record only if it is still at `generation`.
    /// Returns whether anything was removed.
    pub async fn forget_if(&self, container_id: &str, generation: u64) -> bool {
        let mut table = self.table.write().await;
        match table.entries.get(container_id) {
            Some(r) if r.generation == generation => {
                table.entries.remove(container_id);
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy, ordered by container ID.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        let table = self.table.read().await;
        table
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.app_path.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_lookup_forget() {
        let table = Registrations::new();
        assert!(table.lookup("abc").await.is_none());

        table.record_published("abc", "myapp/myapp_v1.web.1".to_string()).await;
        assert_eq!(table.lookup("abc").await.as_deref(), Some("myapp/myapp_v1.web.1"));
        assert_eq!(table.len().await, 1);

        assert_eq!(table.forget("abc").await.as_deref(), Some("myapp/myapp_v1.web.1"));
        assert!(table.is_empty().await);
        assert!(table.forget("abc").await.is_none());
    }

    #[tokio::test]
    async fn forget_if_spares_a_newer_record() {
        let table = Registrations::new();
        let first = table.record_published("abc", "a/a_v1.web.1".to_string()).await;
        let second = table.record_published("abc", "a/a_v1.web.1".to_string()).await;
        assert!(second > first);

        assert!(!table.forget_if("abc", first).await);
        assert_eq!(table.entry("abc").await.unwrap().generation, second);

        assert!(table.forget_if("abc", second).await);
        assert!(table.is_empty().await);
        assert!(!table.forget_if("abc", second).await);
    }

    #[tokio::test]
    async fn republish_overwrites() {
        let table = Registrations::new();
        table.record_published("abc", "a/a_v1.web.1".to_string()).await;
        table.record_published("abc", "a/a_v1.web.1".to_string()).await;
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let table = Registrations::new();
        let other = table.clone();
        other.record_published("x", "a/a_v1.cmd.1".to_string()).await;
        let snapshot = table.snapshot().await;
        assert_eq!(snapshot.get("x").map(String::as_str), Some("a/a_v1.cmd.1"));
    }

    #[tokio::test]
    async fn concurrent_writers_and_readers() {
        let table = Registrations::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("c{i}");
                table.record_published(&id, format!("app/app_v1.web.{}", i + 1)).await;
                table.lookup(&id).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(table.len().await, 32);
    }
}
