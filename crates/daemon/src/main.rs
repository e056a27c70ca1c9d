#![forbid(unsafe_code)]

//! shinbot daemon: signs in, sweeps the globe for shins and serves a live map.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use shinbot_core::{GeoSweeper, HistoryStore, LiveBroadcaster, Orchestrator, RunEnd};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod banner;
mod config;
mod http;
mod remote;
mod viewer;

use crate::auth::IdentityProvider;
use crate::config::{Args, DaemonConfig};
use crate::remote::ShinnerClient;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DaemonConfig::from_args(args)?;
    info!(
        listen = %config.listen,
        sweep = %config.sweep_mode,
        min_radius_km = config.bounds.min_km(),
        max_radius_km = config.bounds.max_km(),
        seeded = config.seed.is_some(),
        "shinbot starting"
    );

    let http_client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("build http client")?;
    let creds = &config.credentials;
    let auth = IdentityProvider::new(http_client.clone(), creds.api_key.clone());
    let session = auth.login(&creds.email, &creds.password).await.context("login")?;

    let client = Arc::new(ShinnerClient::new(http_client, remote::API_URL, auth, session));
    let identity = client.identity().await.context("resolve account")?;

    let broadcaster = LiveBroadcaster::new(Arc::new(HistoryStore::new()), config.observer_buffer);
    let (sweep_rng, pacing_rng) = config.rngs();
    let sweeper = GeoSweeper::new(config.sweep_mode, config.bounds, sweep_rng);
    let mut orchestrator = Orchestrator::new(client, identity.clone(), broadcaster.clone())
        .with_pacing(config.pacing)
        .with_rng(pacing_rng);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);
    let sweep = tokio::spawn(async move {
        let result = orchestrator.run(sweeper, cancel_rx).await;
        match &result {
            Ok(report) => info!(?report, "sweep over"),
            Err(e) => error!(
                error = %e,
                cause = %e.remote(),
                "sweep aborted; live map stays up until shutdown"
            ),
        }
        let _ = done_tx.send(true);
        result
    });

    println!(
        "{}",
        banner::startup_table(config.listen, &creds.email, &identity.username, config.sweep_mode)
    );

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("bind {}", config.listen))?;
    info!(url = %banner::map_url(config.listen), "live map listening");
    axum::serve(listener, http::router(broadcaster))
        .with_graceful_shutdown(shutdown_signal(done_rx, config.exit_on_finish))
        .await
        .context("serve live map")?;

    let _ = cancel_tx.send(true);
    let report = sweep.await.context("sweep task panicked")??;
    if report.end == RunEnd::Cancelled {
        info!(visited = report.circles_visited, "stopped before the sweep finished");
    }
    Ok(())
}

/// Resolves on Ctrl-C, or once the sweep is over when `exit_on_finish` is set.
async fn shutdown_signal(mut done: watch::Receiver<bool>, exit_on_finish: bool) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let finished = async {
        if exit_on_finish && done.wait_for(|d| *d).await.is_ok() {
            return;
        }
        std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = ctrl_c => info!("shutdown requested"),
        _ = finished => info!("sweep over; shutting down"),
    }
}
