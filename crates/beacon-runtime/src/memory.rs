//! Scriptable in-process runtime for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_core::{Container, ContainerEvent};
use tokio::sync::mpsc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::subscription::Subscription;
use crate::ContainerRuntime;

const EVENT_BUFFER: usize = 64;

#[derive(Default)]
struct State {
    containers: Vec<Container>,
    listeners: Vec<mpsc::Sender<ContainerEvent>>,
    fail_list: bool,
    fail_subscribe: bool,
}

/// In-memory runtime: a mutable container table plus an event fan-out.
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryRuntime {
    state: Arc<Mutex<State>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace, by ID) a running container.
    pub fn add_container(&self, container: Container) {
        let mut state = self.lock();
        state.containers.retain(|c| c.id != container.id);
        state.containers.push(container);
    }

    pub fn remove_container(&self, id: &str) {
        self.lock().containers.retain(|c| c.id != id);
    }

    /// Make `list_containers` fail until reset.
    pub fn fail_list(&self, fail: bool) {
        self.lock().fail_list = fail;
    }

    /// Make `subscribe` fail until reset.
    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    /// Number of subscribers still attached.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.listeners.retain(|tx| !tx.is_closed());
        state.listeners.len()
    }

    /// Deliver an event to every attached subscriber. Returns how many
    /// received it.
    pub async fn emit(&self, event: ContainerEvent) -> usize {
        let listeners: Vec<_> = {
            let mut state = self.lock();
            state.listeners.retain(|tx| !tx.is_closed());
            state.listeners.clone()
        };
        let mut delivered = 0;
        for tx in listeners {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// End every subscription, as if the engine's event stream broke.
    pub fn disconnect_all(&self) {
        self.lock().listeners.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory runtime lock")
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn list_containers(&self) -> RuntimeResult<Vec<Container>> {
        let state = self.lock();
        if state.fail_list {
            return Err(RuntimeError::Unavailable("listing disabled".to_string()));
        }
        Ok(state.containers.clone())
    }

    async fn subscribe(&self) -> RuntimeResult<Subscription> {
        let mut state = self.lock();
        if state.fail_subscribe {
            return Err(RuntimeError::Unavailable("events disabled".to_string()));
        }
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        state.listeners.push(tx);
        Ok(Subscription::new(rx, None))
    }
}
