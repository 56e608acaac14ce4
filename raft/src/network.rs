//! The RPC transport an embedding application supplies (§4.10 Transport,
//! §6 External Interfaces).

use async_trait::async_trait;

use crate::rpc_types::AppendEntriesRequest;
use crate::rpc_types::AppendEntriesResponse;
use crate::rpc_types::InstallSnapshotRequest;
use crate::rpc_types::InstallSnapshotResponse;
use crate::rpc_types::RequestVoteRequest;
use crate::rpc_types::RequestVoteResponse;
use crate::NodeId;

/// Sends the three peer-to-peer RPCs to a named node.
///
/// Implementations own how bytes actually move (TCP, in-process channels for
/// tests, whatever); the core only needs a future that resolves to the
/// peer's reply or an error. A failed send is treated the same as a dropped
/// packet (§4.5/§4.6/§4.7): the caller simply retries on the next heartbeat
/// or election timeout rather than treating it as fatal.
#[async_trait]
pub trait RaftNetwork: Send + Sync + 'static {
    async fn append_entries(
        &self,
        target: NodeId,
        rpc: AppendEntriesRequest,
    ) -> anyhow::Result<AppendEntriesResponse>;

    async fn request_vote(&self, target: NodeId, rpc: RequestVoteRequest) -> anyhow::Result<RequestVoteResponse>;

    async fn install_snapshot(
        &self,
        target: NodeId,
        rpc: InstallSnapshotRequest,
    ) -> anyhow::Result<InstallSnapshotResponse>;
}

/// The fixed, ordered set of nodes forming a cluster.
///
/// Membership changes are an open question this crate leaves unresolved
/// (see `Command::ChangeConfiguration`), so this is a static set constructed
/// once at startup rather than a replicated, versioned configuration.
#[derive(Clone, Debug)]
pub struct PeerRegistry {
    this_node: NodeId,
    members: Vec<NodeId>,
}

impl PeerRegistry {
    /// `members` must include `this_node`.
    pub fn new(this_node: NodeId, mut members: Vec<NodeId>) -> Self {
        members.sort_unstable();
        members.dedup();
        debug_assert!(members.contains(&this_node));
        Self { this_node, members }
    }

    pub fn this_node(&self) -> NodeId {
        self.this_node
    }

    pub fn all_members(&self) -> &[NodeId] {
        &self.members
    }

    /// Every member other than this node, the set a leader replicates to.
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied().filter(move |&id| id != self.this_node)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The number of votes (including this node's own) needed to win an
    /// election or commit an entry.
    pub fn quorum(&self) -> usize {
        crate::quorum_of(self.members.len())
    }
}
