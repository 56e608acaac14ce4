//! The in-memory key-value state machine applied commands are run against
//! (§3 Data Model, §4.2 Apply).

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::log::Command;
use crate::LogId;

/// The reply a client gets back for whichever [`Command`] it submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum KvReply {
    /// Reply to `Get`: the value, or `None` if the key is absent.
    Value(Option<String>),
    /// Reply to `Set`/`Clear`/`ChangeConfiguration`: acknowledged.
    Ok,
    /// Reply to `CompareAndSet`: the value now stored under the key (`new`
    /// on a successful swap, the unchanged current value otherwise) plus
    /// whether the swap actually took place. Per §4.2, success is signaled
    /// by `value == new`, but the front-end needs the real current value
    /// to report back on a conflict, not just a bool.
    Swapped { swapped: bool, value: String },
}

/// A minimal, deterministic key-value store driven entirely by applying
/// committed [`Command`]s in log order.
///
/// Every node's copy must converge to identical state given identical input,
/// which is why the only source of nondeterminism a `Command` could smuggle
/// in (wall-clock reads, RNG) is simply not part of the command set.
#[derive(Debug, Default)]
pub struct KvStateMachine {
    data: HashMap<String, String>,
    /// The log id of the last entry applied, used to resume correctly after
    /// restoring a snapshot or replaying the persisted log (§4.9).
    last_applied: LogId,
}

/// The serialized form of a state machine snapshot (§4.4, §4.9).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_included: LogId,
    pub data: HashMap<String, String>,
}

impl KvStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_applied(&self) -> LogId {
        self.last_applied
    }

    /// Apply one committed command, advancing `last_applied`.
    ///
    /// Callers must apply entries strictly in log order; `log_id` below the
    /// current `last_applied` would violate that and is a caller bug, not a
    /// condition this method needs to recover from.
    pub fn apply(&mut self, log_id: LogId, command: &Command) -> KvReply {
        debug_assert!(log_id.index > self.last_applied.index);
        let reply = match command {
            Command::Get { key } => KvReply::Value(self.data.get(key).cloned()),
            Command::Set { key, value } => {
                self.data.insert(key.clone(), value.clone());
                KvReply::Ok
            }
            Command::Clear => {
                self.data.clear();
                KvReply::Ok
            }
            Command::CompareAndSet { key, expected, new } => match self.data.get(key) {
                Some(current) if current == expected => {
                    self.data.insert(key.clone(), new.clone());
                    KvReply::Swapped { swapped: true, value: new.clone() }
                }
                Some(current) => KvReply::Swapped { swapped: false, value: current.clone() },
                None => KvReply::Swapped { swapped: false, value: String::new() },
            },
            // Membership changes are accepted into the log and applied as a
            // no-op; the protocol to actually transition membership is an
            // open question this crate does not implement.
            Command::ChangeConfiguration { .. } => KvReply::Ok,
        };
        self.last_applied = log_id;
        reply
    }

    /// Serialize the current state into a [`Snapshot`] (§4.4).
    pub fn snapshot(&self) -> Snapshot {
        Snapshot { last_included: self.last_applied, data: self.data.clone() }
    }

    /// Replace the entire state with a previously taken (or received)
    /// snapshot (§4.7, §4.9 crash recovery).
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.last_applied = snapshot.last_included;
        self.data = snapshot.data;
    }
}
