//! In-process store with the same hierarchy and TTL rules as etcd.
//!
//! Expiry is evaluated lazily on every call against `tokio::time::Instant`,
//! so tests running under a paused clock can advance past a TTL and
//! observe the key vanish. Every call is appended to a journal, and
//! individual operation kinds can be made to fail on demand.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::node::Node;
use crate::KeyStore;

/// Kind of a store call, for fault injection and journal filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOpKind {
    Set,
    Delete,
    Get,
    UpdateDir,
}

/// A recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set { key: String, value: String, ttl: u64 },
    Delete { key: String, recursive: bool },
    Get { key: String, recursive: bool },
    UpdateDir { key: String, ttl: u64 },
}

impl StoreOp {
    pub fn kind(&self) -> StoreOpKind {
        match self {
            StoreOp::Set { .. } => StoreOpKind::Set,
            StoreOp::Delete { .. } => StoreOpKind::Delete,
            StoreOp::Get { .. } => StoreOpKind::Get,
            StoreOp::UpdateDir { .. } => StoreOpKind::UpdateDir,
        }
    }
}

struct Entry {
    /// `None` marks a directory.
    value: Option<String>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn dir() -> Self {
        Self {
            value: None,
            expires_at: None,
        }
    }

    fn is_dir(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    journal: Vec<StoreOp>,
    failing: HashSet<StoreOpKind>,
}

/// Thread-safe in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `kind` fail with `Unavailable`.
    pub fn fail(&self, kind: StoreOpKind) {
        self.lock().failing.insert(kind);
    }

    /// Stop failing calls of `kind`.
    pub fn heal(&self, kind: StoreOpKind) {
        self.lock().failing.remove(&kind);
    }

    /// Every call made so far, in order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.lock().journal.clone()
    }

    /// Recorded calls of one kind.
    pub fn ops_of(&self, kind: StoreOpKind) -> Vec<StoreOp> {
        self.lock()
            .journal
            .iter()
            .filter(|op| op.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn clear_ops(&self) {
        self.lock().journal.clear();
    }

    /// Current value of a live key, without touching the journal.
    pub fn value(&self, key: &str) -> Option<String> {
        let mut inner = self.lock();
        inner.purge_expired(Instant::now());
        inner.entries.get(&normalize(key)).and_then(|e| e.value.clone())
    }

    /// Remaining lifetime of a live key or directory, without touching the journal.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_expired(now);
        inner
            .entries
            .get(&normalize(key))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Whether a live key or directory exists at `key`.
    pub fn contains(&self, key: &str) -> bool {
        let mut inner = self.lock();
        inner.purge_expired(Instant::now());
        inner.entries.contains_key(&normalize(key))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock")
    }

    /// Journal the call, honour fault injection and drop expired entries.
    fn begin(&self, op: StoreOp) -> StoreResult<std::sync::MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        let kind = op.kind();
        trace!(?op, "memory store call");
        inner.journal.push(op);
        if inner.failing.contains(&kind) {
            return Err(StoreError::Unavailable(format!("{kind:?} disabled")));
        }
        inner.purge_expired(Instant::now());
        Ok(inner)
    }
}

impl Inner {
    fn purge_expired(&mut self, now: Instant) {
        self.entries
            .retain(|_, e| e.expires_at.is_none_or(|at| at > now));

        // Parents sort before their children, so a single ordered pass
        // drops everything below a directory that just expired.
        let mut live: HashSet<String> = HashSet::new();
        let mut orphans = Vec::new();
        for key in self.entries.keys() {
            let parent = parent_of(key);
            if parent == "/" || live.contains(parent) {
                live.insert(key.clone());
            } else {
                orphans.push(key.clone());
            }
        }
        for key in orphans {
            self.entries.remove(&key);
        }
    }

    fn node(&self, key: &str, recursive: bool, now: Instant) -> Node {
        let entry = self.entries.get(key);
        let mut node = Node {
            key: key.to_string(),
            value: entry.and_then(|e| e.value.clone()),
            dir: entry.is_none_or(Entry::is_dir),
            ttl: entry
                .and_then(|e| e.expires_at)
                .map(|at| at.saturating_duration_since(now).as_secs() as i64),
            nodes: Vec::new(),
        };
        if node.dir {
            let children: Vec<String> = self
                .entries
                .keys()
                .filter(|k| parent_of(k) == key)
                .cloned()
                .collect();
            for child in children {
                let child_is_dir = self.entries.get(&child).is_some_and(Entry::is_dir);
                if child_is_dir && !recursive {
                    let mut shallow = self.node(&child, false, now);
                    shallow.nodes.clear();
                    node.nodes.push(shallow);
                } else {
                    node.nodes.push(self.node(&child, recursive, now));
                }
            }
        }
        node
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: u64) -> StoreResult<()> {
        let key = normalize(key);
        let mut inner = self.begin(StoreOp::Set {
            key: key.clone(),
            value: value.to_string(),
            ttl,
        })?;

        if inner.entries.get(&key).is_some_and(Entry::is_dir) {
            return Err(StoreError::NotAFile(key));
        }
        for ancestor in ancestors(&key) {
            match inner.entries.get(ancestor) {
                Some(e) if !e.is_dir() => {
                    return Err(StoreError::NotADirectory(ancestor.to_string()));
                }
                Some(_) => {}
                None => {
                    inner.entries.insert(ancestor.to_string(), Entry::dir());
                }
            }
        }

        let expires_at = (ttl > 0).then(|| Instant::now() + Duration::from_secs(ttl));
        inner.entries.insert(
            key,
            Entry {
                value: Some(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        let key = normalize(key);
        let mut inner = self.begin(StoreOp::Delete {
            key: key.clone(),
            recursive,
        })?;

        let is_dir = match inner.entries.get(&key) {
            Some(e) => e.is_dir(),
            None => return Err(StoreError::NotFound(key)),
        };
        if is_dir && !recursive {
            return Err(StoreError::NotAFile(key));
        }
        let prefix = format!("{key}/");
        inner
            .entries
            .retain(|k, _| k != &key && !k.starts_with(&prefix));
        Ok(())
    }

    async fn get(&self, key: &str, recursive: bool) -> StoreResult<Node> {
        let key = normalize(key);
        let inner = self.begin(StoreOp::Get {
            key: key.clone(),
            recursive,
        })?;

        if key != "/" && !inner.entries.contains_key(&key) {
            return Err(StoreError::NotFound(key));
        }
        Ok(inner.node(&key, recursive, Instant::now()))
    }

    async fn update_dir(&self, key: &str, ttl: u64) -> StoreResult<()> {
        let key = normalize(key);
        let mut inner = self.begin(StoreOp::UpdateDir {
            key: key.clone(),
            ttl,
        })?;

        let expires_at = (ttl > 0).then(|| Instant::now() + Duration::from_secs(ttl));
        match inner.entries.get_mut(&key) {
            None => Err(StoreError::NotFound(key)),
            Some(e) if !e.is_dir() => Err(StoreError::NotADirectory(key)),
            Some(e) => {
                e.expires_at = expires_at;
                Ok(())
            }
        }
    }
}

/// Canonical form: leading `/`, no trailing `/`.
fn normalize(key: &str) -> String {
    let trimmed = key.trim_matches('/');
    format!("/{trimmed}")
}

fn parent_of(key: &str) -> &str {
    match key.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &key[..i],
    }
}

/// Proper ancestors of `key`, outermost first, excluding the root.
fn ancestors(key: &str) -> Vec<&str> {
    key.match_indices('/')
        .filter(|(i, _)| *i > 0)
        .map(|(i, _)| &key[..i])
        .collect()
}
