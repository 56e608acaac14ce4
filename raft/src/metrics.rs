//! Observability: a periodically published snapshot of node state, and a
//! helper for tests/clients that need to wait on a particular condition
//! becoming true (§2 Observability, §6 External Interfaces).

use tokio::sync::watch;

use crate::LogId;
use crate::NodeId;

/// The role a node currently believes itself to hold.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

/// A point-in-time snapshot of a node's Raft state, published on every
/// state transition so a caller can observe progress without polling
/// internal locks.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RaftMetrics {
    pub id: NodeId,
    pub role: RaftRole,
    pub current_term: u64,
    pub last_log_id: LogId,
    pub last_applied: LogId,
    pub current_leader: Option<NodeId>,
}

impl RaftMetrics {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            role: RaftRole::Follower,
            current_term: 0,
            last_log_id: LogId::ZERO,
            last_applied: LogId::ZERO,
            current_leader: None,
        }
    }
}

/// The writer half of a node's metrics channel, held by `RaftCore`.
pub struct MetricsReporter {
    tx: watch::Sender<RaftMetrics>,
}

impl MetricsReporter {
    pub fn new(initial: RaftMetrics) -> (Self, watch::Receiver<RaftMetrics>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }

    pub fn publish(&self, metrics: RaftMetrics) {
        // A closed channel just means nobody is watching; not an error.
        let _ = self.tx.send(metrics);
    }
}

/// A small helper for synchronously waiting on a condition of the metrics
/// stream, mirroring the polling idiom used throughout this crate's test
/// suite (e.g. "wait until someone becomes leader").
#[derive(Clone)]
pub struct Wait {
    rx: watch::Receiver<RaftMetrics>,
}

impl Wait {
    pub fn new(rx: watch::Receiver<RaftMetrics>) -> Self {
        Self { rx }
    }

    /// Block until `pred` returns true for the latest metrics, or the
    /// timeout elapses.
    pub async fn until(
        &mut self,
        timeout: std::time::Duration,
        mut pred: impl FnMut(&RaftMetrics) -> bool,
    ) -> anyhow::Result<RaftMetrics> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let metrics = self.rx.borrow();
                if pred(&metrics) {
                    return Ok(metrics.clone());
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("timed out waiting for metrics condition");
            }
            tokio::select! {
                changed = self.rx.changed() => {
                    changed?;
                }
                _ = tokio::time::sleep(remaining) => {
                    anyhow::bail!("timed out waiting for metrics condition");
                }
            }
        }
    }
}
