//! The public handle a caller uses to drive a Raft node (§6 External
//! Interfaces). Constructing one spawns the event-loop task described in
//! [`crate::core`]; every method here is a cheap, cloneable proxy that sends
//! a message across a channel and awaits the loop's reply.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;

use crate::config::Config;
use crate::core::RaftCore;
use crate::error::ClientResult;
use crate::error::RaftError;
use crate::error::RaftResult;
use crate::log::Command;
use crate::metrics::RaftMetrics;
use crate::network::PeerRegistry;
use crate::network::RaftNetwork;
use crate::persister::Persister;
use crate::rpc_types::AppendEntriesRequest;
use crate::rpc_types::AppendEntriesResponse;
use crate::rpc_types::InstallSnapshotRequest;
use crate::rpc_types::InstallSnapshotResponse;
use crate::rpc_types::RequestVoteRequest;
use crate::rpc_types::RequestVoteResponse;

/// The messages the event loop accepts from the outside world. Every
/// variant carries a reply channel; the loop answers each message exactly
/// once before moving on to the next ready source (§4.4).
pub(crate) enum RaftMsg {
    AppendEntries { rpc: AppendEntriesRequest, tx: oneshot::Sender<AppendEntriesResponse> },
    RequestVote { rpc: RequestVoteRequest, tx: oneshot::Sender<RequestVoteResponse> },
    InstallSnapshot { rpc: InstallSnapshotRequest, tx: oneshot::Sender<InstallSnapshotResponse> },
    ClientCommand { command: Command, tx: oneshot::Sender<ClientResult> },
    Shutdown,
}

/// A handle to a running Raft node.
///
/// Cloning a `Raft` is cheap and shares the same underlying event loop;
/// dropping every clone causes the loop to shut down once its channel
/// closes.
#[derive(Clone)]
pub struct Raft {
    tx_api: mpsc::UnboundedSender<RaftMsg>,
    rx_metrics: watch::Receiver<RaftMetrics>,
}

impl Raft {
    /// Build a node and spawn its event loop.
    ///
    /// `persister` is consulted once at startup to restore any durable
    /// state from a prior run (§3 Lifecycle warm boot); if nothing was
    /// persisted yet the node starts as a fresh Follower.
    pub fn new<N, P>(config: Config, peers: PeerRegistry, network: Arc<N>, persister: Arc<P>) -> Self
    where
        N: RaftNetwork,
        P: Persister,
    {
        let (tx_api, rx_api) = mpsc::unbounded_channel();
        let (metrics_reporter, rx_metrics) = crate::metrics::MetricsReporter::new(RaftMetrics::new(config.id));

        let core = RaftCore::new(config, peers, network, persister, rx_api, metrics_reporter);
        tokio::spawn(core.run());

        Self { tx_api, rx_metrics }
    }

    /// Handle an inbound `AppendEntries` RPC (§4.5).
    pub async fn append_entries(&self, rpc: AppendEntriesRequest) -> RaftResult<AppendEntriesResponse> {
        let (tx, rx) = oneshot::channel();
        self.send(RaftMsg::AppendEntries { rpc, tx }).await?;
        rx.await.map_err(|_| RaftError::ShuttingDown)
    }

    /// Handle an inbound `RequestVote` RPC (§4.6).
    pub async fn vote(&self, rpc: RequestVoteRequest) -> RaftResult<RequestVoteResponse> {
        let (tx, rx) = oneshot::channel();
        self.send(RaftMsg::RequestVote { rpc, tx }).await?;
        rx.await.map_err(|_| RaftError::ShuttingDown)
    }

    /// Handle an inbound `InstallSnapshot` RPC (§4.7).
    pub async fn install_snapshot(&self, rpc: InstallSnapshotRequest) -> RaftResult<InstallSnapshotResponse> {
        let (tx, rx) = oneshot::channel();
        self.send(RaftMsg::InstallSnapshot { rpc, tx }).await?;
        rx.await.map_err(|_| RaftError::ShuttingDown)
    }

    /// Submit a client command (§4.9 KV Front-End).
    ///
    /// Resolves once the command has been committed and applied, or
    /// immediately with a redirect/failure if this node is not the leader.
    /// If this node loses leadership after accepting the command but before
    /// it commits, this future never resolves (§3 Lifecycle) — callers must
    /// apply their own deadline, per §6's note that this is an external
    /// concern.
    pub async fn client_command(&self, command: Command) -> RaftResult<ClientResult> {
        let (tx, rx) = oneshot::channel();
        self.send(RaftMsg::ClientCommand { command, tx }).await?;
        rx.await.map_err(|_| RaftError::ShuttingDown)
    }

    /// The latest published [`RaftMetrics`] snapshot.
    pub fn metrics(&self) -> RaftMetrics {
        self.rx_metrics.borrow().clone()
    }

    /// A receiver that can be awaited for metrics changes, e.g. to block
    /// until a leader is elected.
    pub fn metrics_watch(&self) -> watch::Receiver<RaftMetrics> {
        self.rx_metrics.clone()
    }

    /// Request the event loop shut down.
    pub fn shutdown(&self) {
        let _ = self.tx_api.send(RaftMsg::Shutdown);
    }

    async fn send(&self, msg: RaftMsg) -> RaftResult<()> {
        self.tx_api.send(msg).map_err(|_| RaftError::ShuttingDown)
    }
}
