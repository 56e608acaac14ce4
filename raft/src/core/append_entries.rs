//! AppendEntries receiver handling (§4.5).

use super::RaftCore;
use crate::network::RaftNetwork;
use crate::persister::Persister;
use crate::rpc_types::AppendEntriesRequest;
use crate::rpc_types::AppendEntriesResponse;

#[tracing::instrument(level = "debug", skip(core, rpc), fields(id = core.config.id, leader = rpc.leader_id, term = rpc.term))]
pub(super) async fn handle_append_entries<N, P>(
    core: &mut RaftCore<N, P>,
    rpc: AppendEntriesRequest,
) -> AppendEntriesResponse
where
    N: RaftNetwork,
    P: Persister,
{
    // 1. Stale term: reject outright, no state change.
    if rpc.term < core.current_term {
        return AppendEntriesResponse { term: core.current_term, success: false, conflict_index: None };
    }

    // 2. Term rule, record leader, reset election timer.
    core.observe_term(rpc.term).await;
    core.current_leader = Some(rpc.leader_id);
    core.reset_election_timer();
    if !matches!(core.role, super::Role::Follower) {
        core.become_follower();
    }

    // 3. Consistency check.
    let prev_ok = rpc.prev_log_index == 0
        || core
            .snapshot_pointer
            .is_some_and(|sp| sp.index == rpc.prev_log_index && sp.term == rpc.prev_log_term)
        || core.log.term_at(rpc.prev_log_index) == Some(rpc.prev_log_term);

    if !prev_ok {
        // Report the first index of the conflicting term so the leader can
        // back up next_index by more than one entry per rejected probe.
        let conflict_index = core.log.term_at(rpc.prev_log_index).map(|conflict_term| {
            let mut idx = rpc.prev_log_index;
            while idx > core.log.base_index() + 1 && core.log.term_at(idx - 1) == Some(conflict_term) {
                idx -= 1;
            }
            idx
        });
        return AppendEntriesResponse { term: core.current_term, success: false, conflict_index };
    }

    // 4. Append/merge the replicated suffix.
    let changed = !rpc.entries.is_empty();
    core.log.append_replicated(&rpc.entries);

    // 5. Advance commit index.
    if rpc.leader_commit > core.commit_index {
        core.commit_index = rpc.leader_commit.min(core.log.last_log_id().index);
    }

    // 6. Persist if anything changed.
    if changed {
        core.persist_state().await;
    }

    AppendEntriesResponse { term: core.current_term, success: true, conflict_index: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::log::Command;
    use crate::log::LogEntry;
    use crate::metrics::MetricsReporter;
    use crate::metrics::RaftMetrics;
    use crate::network::PeerRegistry;
    use crate::persister::MemPersister;
    use crate::rpc_types::InstallSnapshotRequest;
    use crate::rpc_types::InstallSnapshotResponse;
    use crate::rpc_types::RequestVoteRequest;
    use crate::rpc_types::RequestVoteResponse;
    use crate::LogId;
    use async_trait::async_trait;
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

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry { log_id: LogId::new(term, index), command: Some(Command::Set { key: "a".into(), value: index.to_string() }) }
    }

    #[tokio::test]
    async fn empty_heartbeat_on_fresh_log_succeeds() {
        let mut core = test_core();
        let resp = handle_append_entries(
            &mut core,
            AppendEntriesRequest { term: 1, leader_id: 2, prev_log_index: 0, prev_log_term: 0, entries: vec![], leader_commit: 0 },
        )
        .await;
        assert!(resp.success);
        assert_eq!(core.current_term, 1);
        assert_eq!(core.current_leader, Some(2));
    }

    #[tokio::test]
    async fn rejects_stale_term() {
        let mut core = test_core();
        core.current_term = 5;
        let resp = handle_append_entries(
            &mut core,
            AppendEntriesRequest { term: 3, leader_id: 2, prev_log_index: 0, prev_log_term: 0, entries: vec![], leader_commit: 0 },
        )
        .await;
        assert!(!resp.success);
        assert_eq!(resp.term, 5);
    }

    #[tokio::test]
    async fn rejects_mismatched_prev_log() {
        let mut core = test_core();
        core.log.append(entry(1, 1));
        let resp = handle_append_entries(
            &mut core,
            AppendEntriesRequest { term: 1, leader_id: 2, prev_log_index: 1, prev_log_term: 99, entries: vec![], leader_commit: 0 },
        )
        .await;
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn appends_new_entries_and_advances_commit() {
        let mut core = test_core();
        let resp = handle_append_entries(
            &mut core,
            AppendEntriesRequest {
                term: 1,
                leader_id: 2,
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![entry(1, 1), entry(1, 2)],
                leader_commit: 2,
            },
        )
        .await;
        assert!(resp.success);
        assert_eq!(core.log.last_log_id(), LogId::new(1, 2));
        assert_eq!(core.commit_index, 2);
    }

    #[tokio::test]
    async fn conflicting_entries_truncate_and_replace() {
        let mut core = test_core();
        core.log.append(entry(1, 1));
        core.log.append(entry(1, 2));
        core.current_term = 1;

        let resp = handle_append_entries(
            &mut core,
            AppendEntriesRequest {
                term: 2,
                leader_id: 2,
                prev_log_index: 1,
                prev_log_term: 1,
                entries: vec![entry(2, 2)],
                leader_commit: 2,
            },
        )
        .await;
        assert!(resp.success);
        assert_eq!(core.log.term_at(2), Some(2));
    }
}
