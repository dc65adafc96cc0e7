//! beacon-runtime — the container engine as seen by the publisher.
//!
//! The publisher needs exactly two things from the engine: a listing of
//! running containers (ID, names, published ports) and a stream of
//! lifecycle events. [`ContainerRuntime`] captures both.
//! [`DockerRuntime`] talks to the Docker Engine API; [`MemoryRuntime`]
//! is a scriptable stand-in for tests.

pub mod docker;
pub mod error;
pub mod memory;
pub mod subscription;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use memory::MemoryRuntime;
pub use subscription::Subscription;

use async_trait::async_trait;
use beacon_core::Container;

/// A container engine: a listing query plus an event source.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List running containers. Each container's ports are sorted ascending.
    async fn list_containers(&self) -> RuntimeResult<Vec<Container>>;

    /// Register a new event listener.
    async fn subscribe(&self) -> RuntimeResult<Subscription>;

    /// Resolve a container ID through a full listing. Event payloads are
    /// not trusted to carry names or ports.
    async fn find_container(&self, id: &str) -> RuntimeResult<Container> {
        self.list_containers()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_string()))
    }
}
