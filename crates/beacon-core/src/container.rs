//! What the container runtime tells us about its containers.
//!
//! These are deliberately thin: the publisher only needs a container's
//! ID, its names and its host-published ports, plus a start/stop signal
//! from the event stream.

use serde::{Deserialize, Serialize};

/// A host-published port of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Port {
    pub public_port: u16,
}

/// A container as listed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    /// Names as reported by the runtime, usually with a leading `/`.
    pub names: Vec<String>,
    /// Published ports, sorted ascending.
    pub ports: Vec<Port>,
}

impl Container {
    pub fn new(id: &str, names: &[&str], ports: &[u16]) -> Self {
        let mut ports: Vec<Port> = ports.iter().map(|&p| Port { public_port: p }).collect();
        ports.sort();
        Self {
            id: id.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            ports,
        }
    }

    /// Names with the runtime's leading path separator removed.
    pub fn clean_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| strip_name_prefix(n))
    }

    /// The lowest-numbered published port. Only this port is ever
    /// registered: one store value per container.
    pub fn lowest_port(&self) -> Option<u16> {
        self.ports.iter().map(|p| p.public_port).min()
    }
}

/// Remove the leading `/` the runtime prepends to container names.
pub fn strip_name_prefix(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

/// Lifecycle status carried by a runtime event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventStatus {
    Start,
    Stop,
    Other(String),
}

impl From<&str> for EventStatus {
    fn from(s: &str) -> Self {
        match s {
            "start" => EventStatus::Start,
            "stop" => EventStatus::Stop,
            other => EventStatus::Other(other.to_string()),
        }
    }
}

/// A single notification from the runtime's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub container_id: String,
    pub status: EventStatus,
}

impl ContainerEvent {
    pub fn new(container_id: &str, status: impl Into<EventStatus>) -> Self {
        Self {
            container_id: container_id.to_string(),
            status: status.into(),
        }
    }

    pub fn start(container_id: &str) -> Self {
        Self::new(container_id, EventStatus::Start)
    }

    pub fn stop(container_id: &str) -> Self {
        Self::new(container_id, EventStatus::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_names_strip_leading_slash_only() {
        let c = Container::new("abc", &["/myapp_v1.web.1", "plain", "//double"], &[]);
        let names: Vec<&str> = c.clean_names().collect();
        assert_eq!(names, vec!["myapp_v1.web.1", "plain", "/double"]);
    }

    #[test]
    fn lowest_port_picks_minimum() {
        let c = Container::new("abc", &["/x"], &[9090, 8080, 8443]);
        assert_eq!(c.lowest_port(), Some(8080));
        assert_eq!(c.ports[0].public_port, 8080);
    }

    #[test]
    fn lowest_port_none_without_ports() {
        let c = Container::new("abc", &["/x"], &[]);
        assert_eq!(c.lowest_port(), None);
    }

    #[test]
    fn event_status_from_str() {
        assert_eq!(EventStatus::from("start"), EventStatus::Start);
        assert_eq!(EventStatus::from("stop"), EventStatus::Stop);
        assert_eq!(EventStatus::from("die"), EventStatus::Other("die".to_string()));
    }
}
