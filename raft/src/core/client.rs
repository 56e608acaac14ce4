//! Client command handling (§4.4 "Client command", §4.8 "On client
//! command", §4.9 KV Front-End).

use tokio::sync::oneshot;

use super::LeaderState;
use super::RaftCore;
use super::Role;
use crate::error::ClientResult;
use crate::log::Command;
use crate::log::LogEntry;
use crate::network::RaftNetwork;
use crate::persister::Persister;
use crate::LogId;

#[tracing::instrument(level = "debug", skip(core, command, tx), fields(id = core.config.id, kind = command.summary()))]
pub(super) async fn handle_client_command<N, P>(
    core: &mut RaftCore<N, P>,
    command: Command,
    tx: oneshot::Sender<ClientResult>,
) where
    N: RaftNetwork,
    P: Persister,
{
    let Role::Leader(_) = &core.role else {
        let _ = tx.send(ClientResult::Redirect(core.current_leader));
        return;
    };

    let index = core.log.last_log_id().index + 1;
    let entry = LogEntry { log_id: LogId::new(core.current_term, index), command: Some(command) };
    core.log.append(entry);
    core.persist_state().await;

    if let Role::Leader(LeaderState { pending_replies, .. }) = &mut core.role {
        pending_replies.insert(index, tx);
    }

    super::replication::replicate_to_all_peers(core).await;
}
