mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::Config;
use shutterlink_protocol::{
    local_ip, PeerDirectory, PeerFilter, PeerRole, TransferCoordinator, TransferEvent,
};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Headless shutterlink receiver node: advertises itself on the local
/// network, accepts transfers, and logs progress and completions.
#[derive(Debug, Parser)]
#[command(name = "shutterlink-daemon", version, about)]
struct Cli {
    /// Config file (default: <config dir>/shutterlink/daemon.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the advertised display name
    #[arg(long)]
    name: Option<String>,

    /// Override the node role (tagger or editor)
    #[arg(long)]
    role: Option<String>,

    /// Override the base destination directory
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// Override the transfer port
    #[arg(long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(&cli)?;
    let settings = config.settings();
    let port = config.network.port;

    let history_path = Config::data_dir().join("history.json");
    let (coordinator, mut events) =
        TransferCoordinator::new(settings.naming(), history_path, settings.history_day());

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind transfer port {}", port))?;
    info!(
        "{} node listening on port {}",
        settings.role.as_str(),
        port
    );

    // Discovery failures are not fatal: the node still accepts direct
    // connections, it just never resolves peers.
    let _directory = match start_discovery(settings.role, &settings.display_name, port) {
        Ok(directory) => Some(directory),
        Err(e) => {
            warn!("running without discovery: {}", e);
            None
        }
    };

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(event);
        }
    });

    let serving = coordinator.clone();
    tokio::select! {
        result = serving.serve(listener) => result.context("accept loop failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);

    let mut config = if path.exists() {
        Config::load(&path)?
    } else {
        // First run: the role and base path must come from the CLI.
        let (Some(role), Some(base_path)) = (&cli.role, &cli.base_path) else {
            bail!(
                "no config at {}; pass --role and --base-path to create one",
                path.display()
            );
        };
        let Some(role) = PeerRole::parse(role) else {
            bail!("invalid role {:?}: expected tagger or editor", role);
        };
        let config = Config {
            node: config::NodeConfig {
                name: cli.name.clone().unwrap_or_default(),
                role,
                base_path: base_path.clone(),
            },
            naming: Default::default(),
            network: Default::default(),
        };
        config.save(&path)?;
        info!("wrote new config to {}", path.display());
        config
    };

    if let Some(name) = &cli.name {
        config.node.name = name.clone();
    }
    if let Some(role) = &cli.role {
        let Some(role) = PeerRole::parse(role) else {
            bail!("invalid role {:?}: expected tagger or editor", role);
        };
        config.node.role = role;
    }
    if let Some(base_path) = &cli.base_path {
        config.node.base_path = base_path.clone();
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    Ok(config)
}

fn start_discovery(role: PeerRole, display_name: &str, port: u16) -> Result<PeerDirectory> {
    let ip = local_ip().context("cannot determine local address")?;

    let mut directory = PeerDirectory::new()?;
    let name = (role == PeerRole::Editor && !display_name.is_empty()).then_some(display_name);
    directory.advertise(role, name, &ip, port)?;
    info!("advertising as {} at {}:{}", role.as_str(), ip, port);

    // Nodes see other editors (minus themselves) as forwarding targets.
    let mut peers = directory.watch(PeerFilter::EditorsExcept(ip))?;
    tokio::spawn(async move {
        while let Some(snapshot) = peers.recv().await {
            if snapshot.is_empty() {
                info!("no editors reachable");
            } else {
                let names: Vec<&str> =
                    snapshot.iter().map(|p| p.display_name.as_str()).collect();
                info!("{} editor(s) reachable: {}", snapshot.len(), names.join(", "));
            }
        }
    });

    Ok(directory)
}

fn log_event(event: TransferEvent) {
    match event {
        TransferEvent::InboundStarted {
            sender,
            file_count,
            total_bytes,
            destination,
            ..
        } => info!(
            "receiving {} files ({:.1} MB) from {} into {}",
            file_count,
            total_bytes as f64 / (1024.0 * 1024.0),
            sender,
            destination.display()
        ),
        TransferEvent::InboundProgress {
            received,
            total,
            speed_bps,
            eta,
            ..
        } => info!(
            "receiving: {:.0}% at {:.1} MB/s, {} left",
            received as f64 / total.max(1) as f64 * 100.0,
            speed_bps / (1024.0 * 1024.0),
            eta
        ),
        TransferEvent::InboundCompleted { destination, .. } => {
            info!("transfer complete: {}", destination.display())
        }
        TransferEvent::InboundFailed { id, reason } => {
            warn!("inbound transfer {} failed: {}", id, reason)
        }
        TransferEvent::OutboundStatusChanged { id, status } => {
            info!("outbound {}: {:?}", id, status)
        }
        TransferEvent::OutboundProgress {
            sent,
            total,
            speed_bps,
            eta,
            ..
        } => info!(
            "sending: {:.0}% at {:.1} MB/s, {} left",
            sent as f64 / total.max(1) as f64 * 100.0,
            speed_bps / (1024.0 * 1024.0),
            eta
        ),
    }
}
