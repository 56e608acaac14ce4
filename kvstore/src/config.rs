//! Node configuration (SPEC_FULL.md §4.11): everything spec.md's §6
//! "Configuration" section names, loadable from a TOML file and overridable
//! by CLI flags in the `kvstore` binary.

use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use raft::NodeId;
use serde::Deserialize;
use serde::Serialize;

/// One other member of the cluster, reachable at its peer-RPC address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerAddr {
    pub id: NodeId,
    pub addr: SocketAddr,
}

/// Everything a node needs to boot: its own identity, the rest of the
/// cluster, where to listen, where to persist, and the consensus timing
/// knobs from spec.md §6.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: NodeId,
    /// The other members of the cluster (never includes `node_id`).
    pub peers: Vec<PeerAddr>,
    /// Listen address for the peer RPC protocol (AppendEntries/RequestVote/InstallSnapshot).
    pub peer_addr: SocketAddr,
    /// Listen address for the KV client RPC protocol.
    pub client_addr: SocketAddr,
    /// Directory the file persister writes `raft_state.bin`/`snapshot.bin` into.
    pub data_dir: PathBuf,

    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// `None`/absent disables log compaction entirely (spec.md §6).
    #[serde(default)]
    pub compaction_threshold: Option<u64>,
}

fn default_election_timeout_min_ms() -> u64 {
    1000
}

fn default_election_timeout_max_ms() -> u64 {
    4000
}

fn default_heartbeat_interval_ms() -> u64 {
    500
}

impl NodeConfig {
    /// Load a config from a TOML file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.as_ref().display()))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Build the consensus-core `Config` this node config implies.
    pub fn raft_config(&self) -> raft::Config {
        raft::Config::new(self.node_id)
            .with_election_timeout_ms(self.election_timeout_min_ms, self.election_timeout_max_ms)
            .with_heartbeat_interval_ms(self.heartbeat_interval_ms)
            .with_compaction_threshold(self.compaction_threshold)
    }

    /// Build the peer registry (§4.3) this node config implies: this node
    /// plus every configured peer, in a single ordered membership set.
    pub fn peer_registry(&self) -> raft::PeerRegistry {
        let mut members: Vec<NodeId> = self.peers.iter().map(|p| p.id).collect();
        members.push(self.node_id);
        raft::PeerRegistry::new(self.node_id, members)
    }

    /// Map every configured peer id to its peer-RPC socket address.
    pub fn peer_addrs(&self) -> std::collections::HashMap<NodeId, SocketAddr> {
        self.peers.iter().map(|p| (p.id, p.addr)).collect()
    }
}
