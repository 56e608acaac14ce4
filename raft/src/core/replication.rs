//! Leader-side replication (§4.8, §9 "Outbound RPC fan-out"): short-lived
//! tasks, one per peer per send, tagged with `(peer, requestTerm)` so the
//! loop can tell a stale reply from a live one without keeping any
//! per-peer actor state around between sends.

use super::RaftCore;
use super::Role;
use crate::network::RaftNetwork;
use crate::persister::Persister;
use crate::rpc_types::AppendEntriesRequest;
use crate::rpc_types::AppendEntriesResponse;
use crate::rpc_types::InstallSnapshotRequest;
use crate::rpc_types::InstallSnapshotResponse;
use crate::rpc_types::RequestVoteResponse;
use crate::NodeId;

/// Replies from in-flight outbound RPCs, fed back into the event loop's
/// `rx_events` channel.
pub(super) enum CoreEvent {
    AppendEntriesReply {
        peer: NodeId,
        term: u64,
        prev_log_index: u64,
        entries_sent: u64,
        result: anyhow::Result<AppendEntriesResponse>,
    },
    RequestVoteReply {
        peer: NodeId,
        term: u64,
        result: anyhow::Result<RequestVoteResponse>,
    },
    InstallSnapshotReply {
        peer: NodeId,
        term: u64,
        result: anyhow::Result<InstallSnapshotResponse>,
    },
}

/// Heartbeat timer fired, or a node just became Leader: send every peer
/// whatever suffix (possibly empty) it is owed, and re-arm the timer.
pub(super) async fn broadcast_heartbeat<N, P>(core: &mut RaftCore<N, P>)
where
    N: RaftNetwork,
    P: Persister,
{
    if !matches!(core.role, Role::Leader(_)) {
        return;
    }
    replicate_to_all_peers(core).await;
    core.reset_heartbeat_timer();
}

/// Kick replication to every peer (§4.8): called both on heartbeat and
/// right after a client command is appended, so a write doesn't have to
/// wait for the next heartbeat tick to start propagating.
pub(super) async fn replicate_to_all_peers<N, P>(core: &mut RaftCore<N, P>)
where
    N: RaftNetwork,
    P: Persister,
{
    let peers: Vec<NodeId> = core.peers.peers().collect();
    for peer in peers {
        send_to_peer(core, peer);
    }
}

fn send_to_peer<N, P>(core: &RaftCore<N, P>, peer: NodeId)
where
    N: RaftNetwork,
    P: Persister,
{
    let Role::Leader(leader) = &core.role else { return };
    let term = core.current_term;
    let next_index = *leader.next_index.get(&peer).unwrap_or(&(core.log.last_log_id().index + 1));
    let prev_index = next_index - 1;

    // If the entry this peer needs next has already been compacted away,
    // it can only be caught up with a snapshot (§4.8, §4.7).
    let below_snapshot = core.snapshot_pointer.is_some_and(|sp| prev_index < sp.index);

    if below_snapshot {
        send_install_snapshot(core, peer, term);
        return;
    }

    let prev_term = if prev_index == 0 {
        0
    } else if core.snapshot_pointer.is_some_and(|sp| sp.index == prev_index) {
        core.snapshot_pointer.unwrap().term
    } else {
        match core.log.term_at(prev_index) {
            Some(term) => term,
            None => {
                send_install_snapshot(core, peer, term);
                return;
            }
        }
    };

    let entries: Vec<_> = ((prev_index + 1)..=core.log.last_log_id().index)
        .filter_map(|i| core.log.get(i).cloned())
        .collect();
    let entries_sent = entries.len() as u64;

    let rpc = AppendEntriesRequest {
        term,
        leader_id: core.config.id,
        prev_log_index: prev_index,
        prev_log_term: prev_term,
        entries,
        leader_commit: core.commit_index,
    };

    let network = core.network.clone();
    let tx_events = core.tx_events.clone();
    tokio::spawn(async move {
        let result = network.append_entries(peer, rpc).await;
        let _ = tx_events.send(CoreEvent::AppendEntriesReply { peer, term, prev_log_index: prev_index, entries_sent, result });
    });
}

fn send_install_snapshot<N, P>(core: &RaftCore<N, P>, peer: NodeId, term: u64)
where
    N: RaftNetwork,
    P: Persister,
{
    let Some(last_included) = core.snapshot_pointer else { return };
    let persister = core.persister.clone();
    let network = core.network.clone();
    let tx_events = core.tx_events.clone();
    let leader_id = core.config.id;

    tokio::spawn(async move {
        let data = match persister.read_snapshot().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return, // nothing to send; next heartbeat will retry once one exists.
            Err(_) => return,   // transport-equivalent failure; retried next heartbeat.
        };
        let rpc = InstallSnapshotRequest { term, leader_id, last_included, data };
        let result = network.install_snapshot(peer, rpc).await;
        let _ = tx_events.send(CoreEvent::InstallSnapshotReply { peer, term, result });
    });
}

pub(super) async fn on_append_entries_reply<N, P>(
    core: &mut RaftCore<N, P>,
    peer: NodeId,
    request_term: u64,
    prev_log_index: u64,
    entries_sent: u64,
    result: anyhow::Result<AppendEntriesResponse>,
) where
    N: RaftNetwork,
    P: Persister,
{
    if request_term != core.current_term {
        return; // stale; superseded by a later heartbeat or a stepdown.
    }

    let response = match result {
        Ok(response) => response,
        Err(_) => return, // transport error: no state change, retried next heartbeat.
    };

    if response.term > core.current_term {
        core.observe_term(response.term).await;
        return;
    }

    let Role::Leader(leader) = &mut core.role else { return };

    if response.success {
        let new_match = prev_log_index + entries_sent;
        let match_index = leader.match_index.entry(peer).or_insert(0);
        *match_index = (*match_index).max(new_match);
        leader.next_index.insert(peer, *match_index + 1);
        advance_commit_index(core);
    } else {
        let next_index = leader.next_index.entry(peer).or_insert(1);
        *next_index = response.conflict_index.unwrap_or(next_index.saturating_sub(1)).max(1);
    }
}

pub(super) async fn on_install_snapshot_reply<N, P>(
    core: &mut RaftCore<N, P>,
    _peer: NodeId,
    request_term: u64,
    result: anyhow::Result<InstallSnapshotResponse>,
) where
    N: RaftNetwork,
    P: Persister,
{
    if request_term != core.current_term {
        return;
    }
    let Ok(response) = result else { return };
    if response.term > core.current_term {
        core.observe_term(response.term).await;
    }
    // On success the peer's next AppendEntries round will report its new
    // match point; nothing further to do here.
}

/// Advance `commit_index` to the highest N such that N is replicated on a
/// quorum and `log[N].term == current_term` (§4.8, the Figure-8 safeguard).
fn advance_commit_index<N, P>(core: &mut RaftCore<N, P>)
where
    N: RaftNetwork,
    P: Persister,
{
    let Role::Leader(leader) = &core.role else { return };
    let current_term = core.current_term;
    let quorum = core.peers.quorum();

    let last_index = core.log.last_log_id().index;
    let mut candidate = core.commit_index;
    for n in (core.commit_index + 1..=last_index).rev() {
        if core.log.term_at(n) != Some(current_term) {
            continue;
        }
        let replicated = 1 + leader.match_index.values().filter(|&&m| m >= n).count();
        if replicated >= quorum {
            candidate = n;
            break;
        }
    }
    core.commit_index = core.commit_index.max(candidate);
}
