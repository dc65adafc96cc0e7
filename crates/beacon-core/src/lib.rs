//! beacon-core — shared domain types for the Beacon publisher.
//!
//! Beacon watches a container runtime and registers the reachable
//! address of every publishable application container in a TTL-based
//! key-value store. This crate holds the pieces every other crate agrees
//! on: how a container name maps to an application identity, where an
//! endpoint lives in the store, what the runtime reports about a
//! container, and how the daemon is configured.

pub mod config;
pub mod container;
pub mod identity;
pub mod keys;

pub use config::{ConfigError, PublisherConfig};
pub use container::{Container, ContainerEvent, EventStatus, Port};
pub use identity::{ApplicationIdentity, ProcessType};
pub use keys::KeyLayout;
