//! codex-sweeper: reconciles a CLIProxyAPI credential pool against upstream
//! validity, probing every managed auth file on an interval and flagging the
//! invalidated ones for deletion.

mod api;
mod config;
mod error;
mod metrics;
mod scheduler;
mod sweeper;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use gateway::{FileKvStore, HttpGateway, KeyStore};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Config;
use crate::sweeper::{HeadlessApprover, Sweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            std::env::var("LOG_LEVEL").map(|level| EnvFilter::new(level))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();

    info!("starting codex-sweeper");

    let prometheus = metrics::install_recorder().context("installing metrics recorder")?;

    let cli_config = std::env::args().nth(1).and_then(|arg| {
        if arg == "--config" {
            std::env::args().nth(2)
        } else {
            arg.strip_prefix("--config=").map(str::to_string)
        }
    });
    let config_path = Config::resolve_path(cli_config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    info!(
        base_url = %config.management.base_url,
        provider_kind = %config.management.provider_kind,
        interval_secs = config.sweep.interval_secs,
        "configuration loaded"
    );

    let kv = Arc::new(
        FileKvStore::load(config.management.key_store_path.clone())
            .await
            .context("loading key store")?,
    );
    let keys = KeyStore::new(kv);
    if let Ok(key) = std::env::var("MANAGEMENT_KEY") {
        keys.set_management_key(&key)
            .await
            .context("storing MANAGEMENT_KEY")?;
        info!("management key seeded from environment");
    }

    let client = reqwest::Client::new();
    let gateway = Arc::new(HttpGateway::new(
        client,
        config.management.base_url.clone(),
        config.request_timeout(),
        config.probe.clone(),
    ));

    let sweeper = Arc::new(Sweeper::new(
        config.sweep_settings(),
        gateway,
        keys,
        Arc::new(HeadlessApprover),
    ));

    let driver = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move {
            sweeper.run_cycle(false).await;
            let mut ticker = tokio::time::interval(sweeper.interval());
            ticker.tick().await; // consume the immediate first tick
            loop {
                ticker.tick().await;
                sweeper.run_cycle(false).await;
            }
        })
    };

    let state = api::AppState {
        sweeper,
        prometheus,
        started_at: Instant::now(),
    };
    let router = api::build_router(state, config.server.max_connections);

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("binding to {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "status API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving status API")?;

    driver.abort();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
