//! beacond — the Beacon publisher daemon.
//!
//! Runs on every container host and assembles:
//! - the Docker runtime client (event stream + listings)
//! - the etcd store client
//! - the publisher's event and poll cycles
//! - a loopback diagnostics endpoint
//!
//! # Usage
//!
//! ```text
//! beacond --host 10.0.0.5 --etcd-host 10.0.0.2 --refresh-duration 10s
//! ```

mod cli;
mod shutdown;

use std::sync::Arc;

use anyhow::Context;
use beacon_core::PublisherConfig;
use beacon_publisher::{diag, Publisher};
use beacon_runtime::DockerRuntime;
use beacon_store::EtcdStore;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    init_tracing(&config.log_level, cli.log_json);
    config.validate().context("invalid configuration")?;

    run(config).await
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: PublisherConfig) -> anyhow::Result<()> {
    info!(
        host = %config.host,
        docker = %config.docker_host,
        etcd = %config.etcd_endpoint(),
        interval = ?config.refresh_interval,
        ttl = ?config.publish_ttl(),
        "beacon publisher starting"
    );

    // ── Collaborators ──────────────────────────────────────────

    let runtime = DockerRuntime::new(&config.docker_host)
        .with_context(|| format!("invalid docker host {}", config.docker_host))?;
    let store = EtcdStore::new(&config.etcd_endpoint())
        .with_context(|| format!("invalid etcd endpoint {}", config.etcd_endpoint()))?;
    let publisher = Publisher::new(Arc::new(runtime), Arc::new(store), &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Diagnostics ────────────────────────────────────────────

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding diagnostics listener on {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "diagnostics listening");

    let router = diag::router(publisher.registrations().clone());
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    // ── Duty cycles ────────────────────────────────────────────

    let mut events = {
        let publisher = publisher.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { publisher.listen(rx).await })
    };
    let poll = {
        let publisher = publisher.clone();
        let interval = config.refresh_interval;
        tokio::spawn(async move { publisher.run_poll_loop(interval, shutdown_rx).await })
    };

    // ── Wait for a signal, or for the event cycle to give up ───

    let early_exit = tokio::select! {
        res = shutdown::wait_for_signal() => {
            res.context("installing signal handlers")?;
            info!("shutdown signal received");
            None
        }
        res = &mut events => Some(res),
    };

    let _ = shutdown_tx.send(true);
    let events_result = match early_exit {
        Some(res) => res,
        None => events.await,
    };
    let _ = poll.await;
    match server.await {
        Ok(Err(e)) => error!(error = %e, "diagnostics server failed"),
        Err(e) => error!(error = %e, "diagnostics server task panicked"),
        Ok(Ok(())) => {}
    }

    events_result
        .context("event cycle task panicked")?
        .context("event cycle failed")?;

    info!("beacon publisher stopped");
    Ok(())
}
