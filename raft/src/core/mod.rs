//! The Raft event loop (§4.4): the single task that owns every piece of
//! mutable state described in §3 and §5. Nothing outside this module ever
//! touches the log, the term, or the role directly — all of it arrives and
//! leaves through the channels wired up in [`crate::raft`].

mod append_entries;
mod client;
mod install_snapshot;
mod replication;
mod vote;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::ClientResult;
use crate::log::RaftLog;
use crate::metrics::MetricsReporter;
use crate::metrics::RaftMetrics;
use crate::metrics::RaftRole;
use crate::network::PeerRegistry;
use crate::network::RaftNetwork;
use crate::persister::Persister;
use crate::persister::RaftState;
use crate::raft::RaftMsg;
use crate::state_machine::KvStateMachine;
use crate::LogId;
use crate::NodeId;

use replication::CoreEvent;

/// Per-peer leader bookkeeping (§3 VolatileState, leader only).
struct LeaderState {
    next_index: HashMap<NodeId, u64>,
    match_index: HashMap<NodeId, u64>,
    /// Index -> the reply sink for the client command accepted at that
    /// index. Removed once the apply pump dispatches a result, or dropped
    /// wholesale on stepping down (§9 "Back-references").
    pending_replies: BTreeMap<u64, oneshot::Sender<ClientResult>>,
}

impl LeaderState {
    fn new(peers: &PeerRegistry, last_log_index: u64) -> Self {
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for peer in peers.peers() {
            next_index.insert(peer, last_log_index + 1);
            match_index.insert(peer, 0);
        }
        Self { next_index, match_index, pending_replies: BTreeMap::new() }
    }
}

/// A candidate's in-progress vote tally, scoped to a single term (§4.6).
struct CandidateState {
    votes_granted: HashSet<NodeId>,
}

/// The three roles a node can hold (§3), modeled as a tagged variant per
/// the redesign in §9 rather than a shared record with role-specific fields
/// that linger stale after a transition.
enum Role {
    Follower,
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl Role {
    fn as_metrics_role(&self) -> RaftRole {
        match self {
            Role::Follower => RaftRole::Follower,
            Role::Candidate(_) => RaftRole::Candidate,
            Role::Leader(_) => RaftRole::Leader,
        }
    }
}

/// The event loop described by §4.4 and §5.
pub(crate) struct RaftCore<N, P> {
    config: Config,
    peers: PeerRegistry,
    network: Arc<N>,
    persister: Arc<P>,

    log: RaftLog,
    state_machine: KvStateMachine,
    snapshot_pointer: Option<LogId>,

    current_term: u64,
    voted_for: Option<NodeId>,
    commit_index: u64,
    last_applied: u64,
    current_leader: Option<NodeId>,

    role: Role,

    rx_api: mpsc::UnboundedReceiver<RaftMsg>,
    tx_events: mpsc::UnboundedSender<CoreEvent>,
    rx_events: mpsc::UnboundedReceiver<CoreEvent>,

    metrics: MetricsReporter,

    election_deadline: Instant,
    heartbeat_deadline: Option<Instant>,
}

impl<N, P> RaftCore<N, P>
where
    N: RaftNetwork,
    P: Persister,
{
    pub(crate) fn new(
        config: Config,
        peers: PeerRegistry,
        network: Arc<N>,
        persister: Arc<P>,
        rx_api: mpsc::UnboundedReceiver<RaftMsg>,
        metrics: MetricsReporter,
    ) -> Self {
        let (tx_events, rx_events) = mpsc::unbounded_channel();
        Self {
            config,
            peers,
            network,
            persister,
            log: RaftLog::new(),
            state_machine: KvStateMachine::new(),
            snapshot_pointer: None,
            current_term: 0,
            voted_for: None,
            commit_index: 0,
            last_applied: 0,
            current_leader: None,
            role: Role::Follower,
            rx_api,
            tx_events,
            rx_events,
            metrics,
            election_deadline: Instant::now(),
            heartbeat_deadline: None,
        }
    }

    /// The main event loop (§4.4, §5).
    #[tracing::instrument(level = "debug", skip(self), fields(id = self.config.id))]
    pub(crate) async fn run(mut self) {
        self.restore_state().await;
        self.reset_election_timer();
        self.publish_metrics();
        tracing::info!(id = self.config.id, "raft core started");

        loop {
            let election_sleep = tokio::time::sleep_until(self.election_deadline);
            let heartbeat_sleep = match self.heartbeat_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline),
                None => tokio::time::sleep_until(Instant::now() + Duration::from_secs(3600)),
            };
            tokio::pin!(election_sleep);
            tokio::pin!(heartbeat_sleep);

            tokio::select! {
                msg = self.rx_api.recv() => {
                    match msg {
                        Some(RaftMsg::Shutdown) | None => break,
                        Some(msg) => self.handle_api_msg(msg).await,
                    }
                }
                Some(event) = self.rx_events.recv() => {
                    self.handle_core_event(event).await;
                }
                _ = &mut election_sleep, if matches!(self.role, Role::Follower | Role::Candidate(_)) => {
                    vote::start_election(&mut self).await;
                }
                _ = &mut heartbeat_sleep, if self.heartbeat_deadline.is_some() => {
                    replication::broadcast_heartbeat(&mut self).await;
                }
            }

            self.apply_pump().await;
            self.maybe_compact().await;
            self.publish_metrics();
        }
    }

    async fn handle_api_msg(&mut self, msg: RaftMsg) {
        match msg {
            RaftMsg::AppendEntries { rpc, tx } => {
                let resp = append_entries::handle_append_entries(self, rpc).await;
                let _ = tx.send(resp);
            }
            RaftMsg::RequestVote { rpc, tx } => {
                let resp = vote::handle_request_vote(self, rpc).await;
                let _ = tx.send(resp);
            }
            RaftMsg::InstallSnapshot { rpc, tx } => {
                let resp = install_snapshot::handle_install_snapshot(self, rpc).await;
                let _ = tx.send(resp);
            }
            RaftMsg::ClientCommand { command, tx } => {
                client::handle_client_command(self, command, tx).await;
            }
            RaftMsg::Shutdown => unreachable!("handled in run()"),
        }
    }

    async fn handle_core_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::AppendEntriesReply { peer, term, prev_log_index, entries_sent, result } => {
                replication::on_append_entries_reply(self, peer, term, prev_log_index, entries_sent, result).await;
            }
            CoreEvent::RequestVoteReply { peer, term, result } => {
                vote::on_request_vote_reply(self, peer, term, result).await;
            }
            CoreEvent::InstallSnapshotReply { peer, term, result } => {
                replication::on_install_snapshot_reply(self, peer, term, result).await;
            }
        }
    }

    /// The term rule: applies whenever any inbound or outbound RPC reveals
    /// a term greater than `current_term` (§4.4).
    async fn observe_term(&mut self, term: u64) -> bool {
        if term > self.current_term {
            tracing::debug!(id = self.config.id, old_term = self.current_term, new_term = term, "observed newer term, stepping down");
            self.current_term = term;
            self.voted_for = None;
            self.become_follower();
            self.persist_state().await;
            true
        } else {
            false
        }
    }

    fn become_follower(&mut self) {
        self.role = Role::Follower;
        self.heartbeat_deadline = None;
        self.reset_election_timer();
    }

    fn become_candidate(&mut self) {
        tracing::debug!(id = self.config.id, term = self.current_term, "becoming candidate");
        self.role = Role::Candidate(CandidateState { votes_granted: HashSet::from([self.config.id]) });
        self.heartbeat_deadline = None;
        self.reset_election_timer();
    }

    async fn become_leader(&mut self) {
        tracing::info!(id = self.config.id, term = self.current_term, "becoming leader");
        self.role = Role::Leader(LeaderState::new(&self.peers, self.log.last_log_id().index));
        self.current_leader = Some(self.config.id);
        self.heartbeat_deadline = Some(Instant::now());
        replication::broadcast_heartbeat(self).await;
    }

    fn reset_election_timer(&mut self) {
        let timeout = Duration::from_millis(self.config.new_rand_election_timeout());
        self.election_deadline = Instant::now() + timeout;
    }

    fn reset_heartbeat_timer(&mut self) {
        self.heartbeat_deadline = Some(Instant::now() + Duration::from_millis(self.config.heartbeat_interval_ms));
    }

    async fn persist_state(&self) {
        let state =
            RaftState { current_term: self.current_term, voted_for: self.voted_for, log: self.log.as_entries().to_vec() };
        if let Err(e) = self.persister.save_raft_state(&state).await {
            // §7 PersistFailure is fatal: acknowledging a change that was
            // never made durable is unsafe.
            panic!("fatal: failed to persist raft state: {e:#}");
        }
    }

    async fn restore_state(&mut self) {
        match self.persister.read_raft_state().await {
            Ok(Some(state)) => {
                self.current_term = state.current_term;
                self.voted_for = state.voted_for;
                self.log = RaftLog::from_entries(state.log);
            }
            Ok(None) => {}
            Err(e) => panic!("fatal: failed to read persisted raft state: {e:#}"),
        }
        match self.persister.read_snapshot().await {
            Ok(Some(bytes)) => match bincode::deserialize::<crate::state_machine::Snapshot>(&bytes) {
                Ok(snapshot) => {
                    self.snapshot_pointer = Some(snapshot.last_included);
                    self.commit_index = snapshot.last_included.index;
                    self.last_applied = snapshot.last_included.index;
                    self.state_machine.restore(snapshot);
                }
                Err(e) => panic!("fatal: failed to decode persisted snapshot: {e:#}"),
            },
            Ok(None) => {}
            Err(e) => panic!("fatal: failed to read persisted snapshot: {e:#}"),
        }
    }

    /// While `commit_index > last_applied`, apply the next entry (§4.4).
    async fn apply_pump(&mut self) {
        while self.commit_index > self.last_applied {
            self.last_applied += 1;
            let index = self.last_applied;
            let entry = match self.log.get(index) {
                Some(entry) => entry.clone(),
                None => panic!("fatal: committed index {index} missing from log (protocol bug)"),
            };

            let reply_sink = if let Role::Leader(leader) = &mut self.role {
                leader.pending_replies.remove(&index)
            } else {
                None
            };

            let reply = match &entry.command {
                Some(command) => Some(self.state_machine.apply(entry.log_id, command)),
                None => None, // sentinel; nothing to apply.
            };

            if let (Some(tx), Some(reply)) = (reply_sink, reply) {
                // Non-blocking by construction: a oneshot send never awaits.
                // A closed receiver means the client front-end gave up.
                let _ = tx.send(ClientResult::Applied(reply));
            }
        }
    }

    /// After applying, snapshot and compact if the log has grown past the
    /// configured threshold (§4.4, recommended policy from §9: every server
    /// compacts on its own apply, not leader-only).
    async fn maybe_compact(&mut self) {
        let Some(threshold) = self.config.compaction_threshold else { return };
        if self.log.len_since_snapshot() < threshold {
            return;
        }
        let snapshot = self.state_machine.snapshot();
        let last_included = snapshot.last_included;
        if last_included.index == 0 {
            return; // nothing applied yet to anchor a snapshot on.
        }
        let bytes = bincode::serialize(&snapshot).expect("snapshot serialization is infallible for this state machine");
        if let Err(e) = self.persister.save_snapshot(&bytes).await {
            panic!("fatal: failed to persist snapshot: {e:#}");
        }
        self.log.compact_to(last_included);
        self.snapshot_pointer = Some(last_included);
        self.persist_state().await;
    }

    fn publish_metrics(&self) {
        self.metrics.publish(RaftMetrics {
            id: self.config.id,
            role: self.role.as_metrics_role(),
            current_term: self.current_term,
            last_log_id: self.log.last_log_id(),
            last_applied: LogId::new(self.log.term_at(self.last_applied).unwrap_or(0), self.last_applied),
            current_leader: self.current_leader,
        });
    }
}
