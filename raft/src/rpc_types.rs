//! The wire types for the three RPCs Raft peers exchange (§4.5 AppendEntries,
//! §4.6 RequestVote, §4.7 InstallSnapshot).

use serde::Deserialize;
use serde::Serialize;

use crate::log::LogEntry;
use crate::NodeId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    /// The first index of the conflicting term in the follower's log, used
    /// to let the leader back up `next_index` by more than one entry per
    /// rejected probe (§4.5 step 3 fast path).
    pub conflict_index: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    /// Deliberately spelled out in full (unlike some upstream
    /// implementations' `lastLogTerm`-as-`lasLogTerm` typo) since this wire
    /// format has no compatibility obligation to anything outside this
    /// crate.
    pub last_log_term: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// A whole-blob snapshot transfer (§4.7): unlike the chunked/offset-based
/// protocol some implementations use to bound peak memory during transfer,
/// here the entire snapshot is sent in one RPC. Snapshots in this system are
/// small enough (a key-value map) that the added bookkeeping of chunking
/// buys nothing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: u64,
    pub leader_id: NodeId,
    pub last_included: crate::LogId,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: u64,
    pub success: bool,
}
