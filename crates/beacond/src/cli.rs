//! Command line flags, layered over the optional config file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use beacon_core::config::parse_duration;
use beacon_core::PublisherConfig;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "beacond",
    about = "Publish this host's application containers to the service registry"
)]
pub struct Cli {
    /// TOML config file. Flags given on the command line override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Container runtime endpoint (unix:///path or tcp://host:port).
    #[arg(long)]
    pub docker_host: Option<String>,

    /// Key-value store host.
    #[arg(long)]
    pub etcd_host: Option<String>,

    /// Key-value store port.
    #[arg(long)]
    pub etcd_port: Option<u16>,

    /// Address other hosts use to reach containers on this one.
    #[arg(long)]
    pub host: Option<String>,

    /// Time between full re-scans (e.g. 10s, 500ms).
    #[arg(long = "refresh-duration", value_parser = parse_duration)]
    pub refresh_interval: Option<Duration>,

    /// TTL on published keys. Defaults to twice the refresh interval.
    #[arg(long = "etcd-ttl", value_parser = parse_duration)]
    pub publish_ttl: Option<Duration>,

    /// Top-level key namespace.
    #[arg(long)]
    pub namespace: Option<String>,

    /// How long the reachability probe waits for a connection.
    #[arg(long, value_parser = parse_duration)]
    pub probe_timeout: Option<Duration>,

    /// Diagnostics listener address.
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Log filter when RUST_LOG is unset (e.g. info, debug, beacon_publisher=trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Load the config file, if any, then apply flag overrides.
    pub fn load_config(&self) -> anyhow::Result<PublisherConfig> {
        let base = match &self.config {
            Some(path) => PublisherConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => PublisherConfig::default(),
        };
        Ok(self.apply(base))
    }

    fn apply(&self, mut config: PublisherConfig) -> PublisherConfig {
        if let Some(v) = &self.docker_host {
            config.docker_host = v.clone();
        }
        if let Some(v) = &self.etcd_host {
            config.etcd_host = v.clone();
        }
        if let Some(v) = self.etcd_port {
            config.etcd_port = v;
        }
        if let Some(v) = &self.host {
            config.host = v.clone();
        }
        if let Some(v) = self.refresh_interval {
            config.refresh_interval = v;
        }
        if let Some(v) = self.publish_ttl {
            config.publish_ttl = Some(v);
        }
        if let Some(v) = &self.namespace {
            config.namespace = v.clone();
        }
        if let Some(v) = self.probe_timeout {
            config.probe_timeout = v;
        }
        if let Some(v) = &self.bind_addr {
            config.bind_addr = v.clone();
        }
        if let Some(v) = &self.log_level {
            config.log_level = v.clone();
        }
        config
    }
}
