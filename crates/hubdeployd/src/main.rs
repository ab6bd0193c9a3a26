//! hubdeployd entry point.
//!
//! # Usage
//!
//! ```text
//! hubdeployd standalone --config /etc/hubdeploy.toml --data-dir /var/lib/hubdeploy
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hubdeploy_core::HubConfig;
use hubdeploy_state::StateStore;
use hubdeployd::{AppContext, build_router};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hubdeployd=debug,hubdeploy=debug";

#[derive(Parser)]
#[command(name = "hubdeployd", about = "Hub deploy daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, drivers and API in one process.
    Standalone {
        /// Path to hubdeploy.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for the state store. Overrides the config file.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Address to listen on. Overrides the config file.
        #[arg(long)]
        listen: Option<String>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            data_dir,
            listen,
            log_json,
        } => {
            init_tracing(log_json);
            let mut hub_config = match &config {
                Some(path) => HubConfig::from_file(path)?,
                None => HubConfig::default(),
            };
            if let Some(dir) = data_dir {
                hub_config.server.data_dir = dir;
            }
            if let Some(addr) = listen {
                hub_config.server.listen = addr;
            }
            run_standalone(hub_config).await
        }
    }
}

async fn run_standalone(config: HubConfig) -> anyhow::Result<()> {
    info!("hub deploy daemon starting in standalone mode");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("hubdeploy.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let addr: SocketAddr = config.server.listen.parse()?;
    let app = Arc::new(AppContext::new(config, store)?);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver_handle = app.spawn_driver(shutdown_rx);

    // ── API server ─────────────────────────────────────────────

    let router = build_router(app.clone());
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = driver_handle {
        let _ = handle.await;
    }
    app.shutdown().await;

    info!("hub deploy daemon stopped");
    Ok(())
}
