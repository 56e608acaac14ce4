//! RequestVote handling and the election path (§4.6).

use super::CandidateState;
use super::CoreEvent;
use super::RaftCore;
use super::Role;
use crate::network::RaftNetwork;
use crate::persister::Persister;
use crate::rpc_types::RequestVoteRequest;
use crate::rpc_types::RequestVoteResponse;
use crate::LogId;

#[tracing::instrument(level = "debug", skip(core, rpc), fields(id = core.config.id, candidate = rpc.candidate_id, term = rpc.term))]
pub(super) async fn handle_request_vote<N, P>(
    core: &mut RaftCore<N, P>,
    rpc: RequestVoteRequest,
) -> RequestVoteResponse
where
    N: RaftNetwork,
    P: Persister,
{
    if rpc.term < core.current_term {
        return RequestVoteResponse { term: core.current_term, vote_granted: false };
    }

    core.observe_term(rpc.term).await;

    let log_ok = core
        .log
        .is_candidate_log_up_to_date(LogId::new(rpc.last_log_term, rpc.last_log_index));
    let can_vote = match core.voted_for {
        None => true,
        Some(id) => id == rpc.candidate_id,
    };

    if can_vote && log_ok {
        core.voted_for = Some(rpc.candidate_id);
        core.persist_state().await;
        core.reset_election_timer();
        RequestVoteResponse { term: core.current_term, vote_granted: true }
    } else {
        RequestVoteResponse { term: core.current_term, vote_granted: false }
    }
}

/// Election timer fired while Follower or Candidate: start a new election
/// (§4.6 Candidate).
#[tracing::instrument(level = "debug", skip(core), fields(id = core.config.id, term = core.current_term + 1))]
pub(super) async fn start_election<N, P>(core: &mut RaftCore<N, P>)
where
    N: RaftNetwork,
    P: Persister,
{
    core.current_term += 1;
    core.voted_for = Some(core.config.id);
    core.current_leader = None;
    core.become_candidate();
    core.persist_state().await;

    // A single-node cluster's own vote already satisfies quorum; don't wait
    // on peer replies that will never arrive.
    if core.peers.quorum() <= 1 {
        core.become_leader().await;
        return;
    }

    let term = core.current_term;
    let last_log_id = core.log.last_log_id();

    for peer in core.peers.peers() {
        let network = core.network.clone();
        let tx_events = core.tx_events.clone();
        let rpc = RequestVoteRequest {
            term,
            candidate_id: core.config.id,
            last_log_index: last_log_id.index,
            last_log_term: last_log_id.term,
        };
        tokio::spawn(async move {
            let result = network.request_vote(peer, rpc).await;
            let _ = tx_events.send(CoreEvent::RequestVoteReply { peer, term, result });
        });
    }
}

pub(super) async fn on_request_vote_reply<N, P>(
    core: &mut RaftCore<N, P>,
    peer: crate::NodeId,
    request_term: u64,
    result: anyhow::Result<RequestVoteResponse>,
) where
    N: RaftNetwork,
    P: Persister,
{
    // Stale responses (wrong term, or we've moved off Candidate) are
    // discarded per §4.6 — the request_term tag prevents a late reply from
    // a previous election from corrupting this one's tally.
    if request_term != core.current_term {
        return;
    }
    let Role::Candidate(candidate) = &mut core.role else { return };

    let response = match result {
        Ok(response) => response,
        Err(_) => return, // transport error; no state change (§7 TransportError).
    };

    if response.term > core.current_term {
        core.observe_term(response.term).await;
        return;
    }

    if response.vote_granted {
        candidate.votes_granted.insert(peer);
        if candidate.votes_granted.len() >= core.peers.quorum() {
            core.become_leader().await;
        }
    }
}
