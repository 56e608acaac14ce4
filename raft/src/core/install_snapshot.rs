//! InstallSnapshot receiver handling (§4.7).

use super::RaftCore;
use crate::network::RaftNetwork;
use crate::persister::Persister;
use crate::rpc_types::InstallSnapshotRequest;
use crate::rpc_types::InstallSnapshotResponse;
use crate::state_machine::Snapshot;

#[tracing::instrument(level = "info", skip(core, rpc), fields(id = core.config.id, leader = rpc.leader_id, last_included = %rpc.last_included))]
pub(super) async fn handle_install_snapshot<N, P>(
    core: &mut RaftCore<N, P>,
    rpc: InstallSnapshotRequest,
) -> InstallSnapshotResponse
where
    N: RaftNetwork,
    P: Persister,
{
    if rpc.term < core.current_term {
        return InstallSnapshotResponse { term: core.current_term, success: false };
    }

    core.observe_term(rpc.term).await;
    core.current_leader = Some(rpc.leader_id);
    core.reset_election_timer();
    if !matches!(core.role, super::Role::Follower) {
        core.become_follower();
    }

    if let Err(e) = core.persister.save_snapshot(&rpc.data).await {
        panic!("fatal: failed to persist installed snapshot: {e:#}");
    }

    let snapshot = match bincode::deserialize::<Snapshot>(&rpc.data) {
        Ok(snapshot) => snapshot,
        Err(e) => panic!("fatal: failed to decode installed snapshot: {e:#}"),
    };

    core.state_machine.restore(snapshot);
    core.snapshot_pointer = Some(rpc.last_included);
    core.log.compact_to(rpc.last_included);
    core.commit_index = rpc.last_included.index;
    core.last_applied = rpc.last_included.index;
    core.persist_state().await;

    InstallSnapshotResponse { term: core.current_term, success: true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::MetricsReporter;
    use crate::metrics::RaftMetrics;
    use crate::network::PeerRegistry;
    use crate::persister::MemPersister;
    use crate::rpc_types::AppendEntriesRequest;
    use crate::rpc_types::AppendEntriesResponse;
    use crate::rpc_types::RequestVoteRequest;
    use crate::rpc_types::RequestVoteResponse;
    use crate::LogId;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct NullNetwork;

    #[async_trait]
    impl RaftNetwork for NullNetwork {
        async fn append_entries(
            &self,
            _target: crate::NodeId,
            _rpc: AppendEntriesRequest,
        ) -> anyhow::Result<AppendEntriesResponse> {
            anyhow::bail!("no network in this test")
        }
        async fn request_vote(
            &self,
            _target: crate::NodeId,
            _rpc: RequestVoteRequest,
        ) -> anyhow::Result<RequestVoteResponse> {
            anyhow::bail!("no network in this test")
        }
        async fn install_snapshot(
            &self,
            _target: crate::NodeId,
            _rpc: InstallSnapshotRequest,
        ) -> anyhow::Result<InstallSnapshotResponse> {
            anyhow::bail!("no network in this test")
        }
    }

    fn test_core() -> RaftCore<NullNetwork, MemPersister> {
        let (_tx_api, rx_api) = mpsc::unbounded_channel();
        let (metrics, _rx) = MetricsReporter::new(RaftMetrics::new(1));
        RaftCore::new(
            Config::new(1),
            PeerRegistry::new(1, vec![1, 2, 3]),
            Arc::new(NullNetwork),
            Arc::new(MemPersister::new()),
            rx_api,
            metrics,
        )
    }

    #[tokio::test]
    async fn installs_snapshot_and_resets_log_to_sentinel() {
        let mut core = test_core();
        let mut data = HashMap::new();
        data.insert("a".to_string(), "1".to_string());
        let last_included = LogId::new(2, 10);
        let bytes = bincode::serialize(&Snapshot { last_included, data }).unwrap();

        let resp = handle_install_snapshot(
            &mut core,
            InstallSnapshotRequest { term: 2, leader_id: 9, last_included, data: bytes },
        )
        .await;

        assert_eq!(resp.term, 2);
        assert!(resp.success);
        assert_eq!(core.log.base_index(), 10);
        assert_eq!(core.commit_index, 10);
        assert_eq!(core.last_applied, 10);
        assert_eq!(core.snapshot_pointer, Some(last_included));
    }

    #[tokio::test]
    async fn rejects_stale_term() {
        let mut core = test_core();
        core.current_term = 5;
        let resp = handle_install_snapshot(
            &mut core,
            InstallSnapshotRequest { term: 2, leader_id: 9, last_included: LogId::new(2, 1), data: vec![] },
        )
        .await;
        assert_eq!(resp.term, 5);
        assert!(!resp.success);
        assert_eq!(core.log.base_index(), 0);
    }
}
