//! opsgated — the operations console daemon.
//!
//! Single binary that assembles the console subsystems:
//! - State store (redb)
//! - Probe registry + scheduler
//! - Privileged helper client
//! - REST API
//!
//! # Usage
//!
//! ```text
//! OPSGATE_ADMIN_TOKEN=... opsgated serve --config /etc/opsgate/opsgate.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use opsgate_actions::ActionExecutor;
use opsgate_api::{ApiState, TokenGuard};
use opsgate_core::{OpsgateConfig, ProbeRegistry};
use opsgate_helper::{Allowlist, HelperClient};
use opsgate_probes::ProbeRunner;
use opsgate_scheduler::ProbeScheduler;
use opsgate_state::StateStore;

/// Environment variable holding the admin token. Never read from the
/// config file.
const ADMIN_TOKEN_VAR: &str = "OPSGATE_ADMIN_TOKEN";

#[derive(Parser)]
#[command(name = "opsgated", about = "opsgate operations console daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the console: scheduler, helper client, and REST API.
    Serve {
        /// Path to the config file.
        #[arg(long, default_value = "/etc/opsgate/opsgate.toml")]
        config: PathBuf,

        /// Override the bind host from the config file.
        #[arg(long)]
        host: Option<String>,

        /// Override the bind port from the config file.
        #[arg(long)]
        port: Option<u16>,

        /// Override the data directory from the config file.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Override the scheduler tick interval in seconds.
        #[arg(long)]
        tick: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,opsgated=debug,opsgate=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            data_dir,
            tick,
        } => serve(config, host, port, data_dir, tick).await,
    }
}

async fn serve(
    config_path: PathBuf,
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    tick: Option<u64>,
) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "opsgate console starting");

    let mut config = OpsgateConfig::from_file(&config_path)?;
    if let Some(host) = host {
        config.server.bind_host = host;
    }
    if let Some(port) = port {
        config.server.bind_port = port;
    }
    if let Some(data_dir) = data_dir {
        config.server.data_dir = data_dir;
    }
    if let Some(tick) = tick {
        config.scheduler.tick_seconds = tick;
    }

    let token = TokenGuard::new(std::env::var(ADMIN_TOKEN_VAR).ok());
    if !token.is_configured() {
        warn!("{ADMIN_TOKEN_VAR} is not set; all authenticated routes will answer 401");
    }

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("opsgate.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let registry = Arc::new(ProbeRegistry::from_config(&config.probes)?);
    info!(probes = registry.len(), "probe registry built");

    let scheduler = ProbeScheduler::new(Arc::clone(&registry), store.clone(), ProbeRunner::new());

    let allowlist = Allowlist::from_config(&config.targets, &config.actions);
    let helper_client = HelperClient::new(&config.helper);
    let actions = Arc::new(ActionExecutor::new(allowlist, helper_client, store.clone()));
    info!(socket = %config.helper.socket_path.display(), "helper client configured");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Scheduler loop ─────────────────────────────────────────

    let tick_interval = Duration::from_secs(config.scheduler.tick_seconds.max(1));
    let scheduler_handle = tokio::spawn(
        scheduler.clone().run_loop(tick_interval, shutdown_rx),
    );

    // ── API server ─────────────────────────────────────────────

    let config = Arc::new(config);
    let router = opsgate_api::build_router(ApiState {
        store,
        registry,
        scheduler,
        actions,
        config: Arc::clone(&config),
        token,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.bind_host, config.server.bind_port)
        .parse()?;
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = scheduler_handle.await;
    info!("opsgate console stopped");
    Ok(())
}
