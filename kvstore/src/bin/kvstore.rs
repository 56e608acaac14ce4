//! Process entrypoint for a single `kvstore` node: load configuration,
//! construct the file persister and TCP network, spawn the Raft core, and
//! serve the peer and client RPC listeners (SPEC_FULL.md §2 "Shim wiring").

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kvstore::config::NodeConfig;
use kvstore::ClientServer;
use kvstore::PeerServer;
use kvstore::TcpRaftNetwork;
use raft::FilePersister;
use raft::Raft;

#[derive(Parser, Debug)]
#[command(version, about = "A Raft-replicated key-value store node", long_about = None)]
struct Cli {
    /// Path to this node's TOML config file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the data directory from the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let cli = Cli::parse();
    let mut config = NodeConfig::from_file(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    tracing::info!(node_id = config.node_id, peer_addr = %config.peer_addr, client_addr = %config.client_addr, "starting kvstore node");

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let persister = Arc::new(FilePersister::new(&config.data_dir));
    let network = Arc::new(TcpRaftNetwork::new(config.peer_addrs()));

    let raft = Raft::new(config.raft_config(), config.peer_registry(), network, persister);

    let peer_server = PeerServer::bind(config.peer_addr, raft.clone()).await?;
    let client_server = ClientServer::bind(config.client_addr, raft.clone()).await?;

    let peer_task = tokio::spawn(peer_server.serve());
    let client_task = tokio::spawn(client_server.serve());

    tokio::select! {
        result = peer_task => {
            result??;
        }
        result = client_task => {
            result??;
        }
    }

    Ok(())
}
