//! Error types surfaced by the Raft core and its external interfaces.

use thiserror::Error;

use crate::NodeId;

/// Errors that can occur while driving the Raft core.
///
/// Most of these are handled internally and never escape `RaftCore` (a
/// stale-term response is simply dropped, for instance); the variants that
/// do escape are the ones a caller of [`crate::Raft`] needs to react to.
#[derive(Debug, Error)]
pub enum RaftError {
    /// The Raft node has shut down (or is shutting down) and can no longer
    /// accept requests.
    #[error("raft node is shutting down")]
    ShuttingDown,

    /// A fatal error occurred in the persister. Per §7, this is non-recoverable:
    /// the node aborts rather than risk acknowledging a change that was never
    /// made durable.
    #[error("fatal persistence error: {0}")]
    Persist(#[source] anyhow::Error),

    /// The transport reported a failure sending an RPC to a peer.
    #[error("transport error contacting node {node}: {source}")]
    Transport {
        node: NodeId,
        #[source]
        source: anyhow::Error,
    },
}

pub type RaftResult<T> = std::result::Result<T, RaftError>;

/// The result of a client write or read request handed to the Raft core.
///
/// This is the concrete analogue of the teacher library's
/// `ClientWriteError`/`ClientReadError`: because this crate's `Command` type
/// is fixed (not generic over application data), redirect/failure responses
/// are folded into a single result type that the KV front-end surfaces
/// directly as its own RPC `Result` (§6).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum ClientResult {
    /// The command was committed and applied; carries the state machine's reply.
    Applied(crate::state_machine::KvReply),
    /// This node is not the leader. Carries the last known leader, if any.
    Redirect(Option<NodeId>),
    /// The command could not be processed for the given reason.
    Failure(String),
}
