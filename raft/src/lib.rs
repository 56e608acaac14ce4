//! A Raft consensus core for a small replicated key-value store.
//!
//! This crate implements the leader-based replication protocol described by
//! the Raft paper: term/election handling, log replication with the
//! log-matching invariants, commit-index advancement, snapshot installation,
//! and persistence of the state a crashed node needs in order to safely
//! rejoin. A minimal in-memory key-value state machine is bundled because it
//! supplies the `apply` contract and the snapshot codec; see
//! [`state_machine`].
//!
//! The pieces intentionally left as traits ([`Persister`], [`RaftNetwork`])
//! are the ones an embedding application is expected to supply: durable
//! storage and the RPC transport. The `kvstore` crate in this workspace
//! wires concrete implementations of both together with the core to produce
//! a runnable server.

pub mod config;
mod core;
pub mod error;
pub mod log;
pub mod metrics;
pub mod network;
pub mod persister;
pub mod raft;
pub mod rpc_types;
pub mod state_machine;

pub use config::Config;
pub use error::ClientResult;
pub use error::RaftError;
pub use error::RaftResult;
pub use log::Command;
pub use log::LogEntry;
pub use metrics::RaftMetrics;
pub use network::PeerRegistry;
pub use network::RaftNetwork;
pub use persister::FilePersister;
pub use persister::Persister;
pub use raft::Raft;
pub use state_machine::KvReply;
pub use state_machine::KvStateMachine;

/// The stable identity of a node within a cluster.
pub type NodeId = u64;

/// A (term, index) pair identifying a position in the log.
///
/// Ordering is lexicographic on `(term, index)`, which is exactly the
/// "more up-to-date log" comparison used by the election §5.4 rule.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize)]
pub struct LogId {
    pub term: u64,
    pub index: u64,
}

impl LogId {
    pub const ZERO: LogId = LogId { term: 0, index: 0 };

    pub fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl std::fmt::Display for LogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.term, self.index)
    }
}

/// Compute the quorum size (a strict majority) of a cluster of `n` members.
pub fn quorum_of(n: usize) -> usize {
    n / 2 + 1
}
