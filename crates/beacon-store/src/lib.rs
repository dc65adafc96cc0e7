//! beacon-store — the key-value store the publisher writes endpoints to.
//!
//! The store is hierarchical (directories of keys), every key and
//! directory may carry a TTL, and nothing is transactional. The
//! [`KeyStore`] trait captures the four calls the publisher needs;
//! [`EtcdStore`] implements them against the etcd v2 keys API and
//! [`MemoryStore`] reproduces the same semantics in process for tests.
//!
//! # Semantics shared by both backends
//!
//! - `set` creates missing parent directories (without TTL).
//! - An entry disappears once its own TTL, or that of any ancestor
//!   directory, runs out.
//! - `update_dir` only refreshes an existing directory; it never
//!   creates one.
//! - A non-recursive `delete` of a directory is rejected.

pub mod error;
pub mod etcd;
pub mod memory;
pub mod node;

pub use error::{StoreError, StoreResult};
pub use etcd::EtcdStore;
pub use memory::{MemoryStore, StoreOp, StoreOpKind};
pub use node::Node;

use async_trait::async_trait;

/// A networked, TTL-keyed hierarchical store.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Write `value` at `key`, expiring after `ttl` seconds (0 = never).
    async fn set(&self, key: &str, value: &str, ttl: u64) -> StoreResult<()>;

    /// Remove `key`. Directories require `recursive`.
    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()>;

    /// Read `key`; for a directory, its children (all descendants if
    /// `recursive`).
    async fn get(&self, key: &str, recursive: bool) -> StoreResult<Node>;

    /// Reset the TTL of an existing directory.
    async fn update_dir(&self, key: &str, ttl: u64) -> StoreResult<()>;
}
