//! Publisher configuration.
//!
//! Every field has a default, so an empty `beacon.toml` (or no file at
//! all) yields a working single-host setup. The daemon layers command
//! line flags over whatever the file provides.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::KeyLayout;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("refresh interval must be greater than zero")]
    InvalidInterval,

    #[error("publish TTL must be at least one second")]
    TtlTooShort,

    #[error("publish TTL ({ttl:?}) must exceed the refresh interval ({interval:?})")]
    TtlNotGreaterThanInterval { ttl: Duration, interval: Duration },

    #[error("invalid bind address: {0}")]
    InvalidAddress(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Container runtime endpoint (`unix://...`, `tcp://host:port`).
    pub docker_host: String,
    pub etcd_host: String,
    pub etcd_port: u16,
    /// Address other hosts use to reach containers published here.
    pub host: String,
    /// Time between full re-scans.
    #[serde(with = "duration_str")]
    pub refresh_interval: Duration,
    /// TTL on every published key. Defaults to twice the refresh interval.
    #[serde(with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub publish_ttl: Option<Duration>,
    pub namespace: String,
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,
    /// Diagnostics listener.
    pub bind_addr: String,
    pub log_level: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            docker_host: "unix:///var/run/docker.sock".to_string(),
            etcd_host: "127.0.0.1".to_string(),
            etcd_port: 4001,
            host: "127.0.0.1".to_string(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            publish_ttl: None,
            namespace: "deis".to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            bind_addr: "127.0.0.1:6060".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl PublisherConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Effective publish TTL.
    pub fn publish_ttl(&self) -> Duration {
        self.publish_ttl
            .unwrap_or_else(|| self.refresh_interval.saturating_mul(2))
    }

    /// Publish TTL in whole seconds, as written to the store. Fractions
    /// round up so the written TTL is never shorter than the configured one.
    pub fn publish_ttl_secs(&self) -> u64 {
        let ttl = self.publish_ttl();
        ttl.as_secs()
            .saturating_add(u64::from(ttl.subsec_nanos() > 0))
    }

    pub fn etcd_endpoint(&self) -> String {
        format!("http://{}:{}", self.etcd_host, self.etcd_port)
    }

    pub fn layout(&self) -> KeyLayout {
        KeyLayout::new(&self.namespace)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::InvalidInterval);
        }
        if self.publish_ttl.is_none() && self.refresh_interval.checked_mul(2).is_none() {
            return Err(ConfigError::InvalidDuration(format_duration(
                self.refresh_interval,
            )));
        }
        let ttl = self.publish_ttl();
        if ttl < Duration::from_secs(1) {
            return Err(ConfigError::TtlTooShort);
        }
        // Both the configured TTL and the whole seconds actually written
        // must outlast one refresh interval.
        let written = Duration::from_secs(self.publish_ttl_secs());
        if ttl <= self.refresh_interval || written <= self.refresh_interval {
            return Err(ConfigError::TtlNotGreaterThanInterval {
                ttl: written,
                interval: self.refresh_interval,
            });
        }
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidAddress(self.bind_addr.clone()))?;
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "2m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))
}

/// Render a duration the way `parse_duration` reads it back.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_str(&super::format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        raw.map(|r| super::parse_duration(&r).map_err(serde::de::Error::custom))
            .transpose()
    }
}
