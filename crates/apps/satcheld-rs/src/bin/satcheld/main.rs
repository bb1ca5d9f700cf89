use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;

use satchel_consent::{FileStore, MemoryStore, SnapshotStore};
use satchel_daemon::{Background, Collaborators, DaemonConfig};
use satchel_rpc::MessageHub;

#[derive(Parser, Debug)]
#[command(name = "satcheld", version)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured snapshot directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Overrides the configured channel name.
    #[arg(long)]
    channel: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }
    if let Some(channel) = args.channel {
        config.channel = channel;
    }

    let store: Arc<dyn SnapshotStore> = match &config.data_dir {
        Some(dir) => Arc::new(FileStore::new(dir)),
        None => {
            info!("no data_dir configured, queue snapshots are in-memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let background = Background::start(&config, MessageHub::new(), store, Collaborators::stubs())
        .context("failed to start background")?;

    tokio::signal::ctrl_c().await.context("failed to wait for shutdown signal")?;
    info!("shutdown signal received");
    background.shutdown();
    Ok(())
}
