//! `hikup-server` - storage node daemon.
//!
//! Runs the wire-protocol listener, the optional HTTP exposure, and the
//! periodic sync master loop, all under one cancellation token flipped by
//! SIGINT/SIGTERM. Shutdown drains in-flight connections.

use anyhow::Context;
use clap::Parser;
use hikup::config::Settings;
use hikup::server::{NodeState, Server};
use hikup::storage::Storage;
use hikup::tracker::RemovalTracker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hikup-server", version, about = "hikup storage node")]
struct Cli {
    /// Base directory holding storage/, links/ and settings/
    #[arg(long, default_value = ".")]
    dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings_dir = cli.dir.join("settings");
    std::fs::create_dir_all(&settings_dir)?;

    let settings = Arc::new(
        Settings::load(&settings_dir.join("settings.toml")).context("loading settings")?,
    );

    let storage = Storage::open(&cli.dir).context("opening storage")?;
    let repaired = storage.repair_links()?;
    if repaired > 0 {
        info!(repaired, "recreated missing name aliases");
    }

    let tracker =
        RemovalTracker::load(&settings_dir.join("tracker.toml")).context("loading tracker")?;
    let node = Arc::new(Mutex::new(NodeState {
        storage: storage.clone(),
        tracker,
    }));

    let shutdown = CancellationToken::new();
    tokio::spawn(signal_listener(shutdown.clone()));

    if settings.server.want_http_server {
        let http_storage = storage.clone();
        let http_settings = Arc::clone(&settings);
        let http_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = hikup::http::serve(http_storage, http_settings, http_shutdown).await {
                error!(error = %e, "http server failed");
            }
        });
    }

    let sync_task = tokio::spawn(hikup::sync::master_loop(
        Arc::clone(&node),
        Arc::clone(&settings),
        shutdown.clone(),
    ));

    let server = Server::bind(settings, storage, node, shutdown.clone())
        .await
        .context("binding listener")?;
    server.run().await.context("serving")?;

    sync_task.await?;
    info!("shutdown complete");
    Ok(())
}

async fn signal_listener(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler");
                let _ = ctrl_c.await;
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = term.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received ctrl-c");
    }
    shutdown.cancel();
}
