//! opsgate-helperd — the privileged helper daemon.
//!
//! Runs as root (or a user allowed to manage services and containers),
//! listens on a unix socket, and executes allowlisted `systemctl`/`docker`
//! actions on behalf of the unprivileged console.
//!
//! # Usage
//!
//! ```text
//! opsgate-helperd --config /etc/opsgate/opsgate.toml
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use opsgate_core::OpsgateConfig;
use opsgate_helper::{Allowlist, HelperService};

#[derive(Parser)]
#[command(name = "opsgate-helperd", about = "opsgate privileged helper daemon")]
struct Cli {
    /// Path to the shared opsgate config file.
    #[arg(long, default_value = "/etc/opsgate/opsgate.toml")]
    config: PathBuf,

    /// Override the socket path from the config file.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Override the socket group from the config file.
    #[arg(long)]
    group: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,opsgate=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = OpsgateConfig::from_file(&cli.config)?;

    let mut helper_config = config.helper.clone();
    if let Some(socket) = cli.socket {
        helper_config.socket_path = socket;
    }
    if let Some(group) = cli.group {
        helper_config.socket_group = group;
    }

    let allowlist = Allowlist::from_config(&config.targets, &config.actions);
    info!(
        services = allowlist.services().count(),
        containers = allowlist.containers().count(),
        config = %cli.config.display(),
        "allowlist loaded"
    );

    let service = HelperService::new(&helper_config, allowlist);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    service.serve(shutdown_rx).await?;
    info!("helper stopped");
    Ok(())
}
