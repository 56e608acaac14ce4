//! The replicated command log (§3 Data Model: Command, LogEntry, Log).

use serde::Deserialize;
use serde::Serialize;

use crate::LogId;
use crate::NodeId;

/// A client-visible operation, replicated through the log.
///
/// `Get` is replicated rather than served as a fast path (see spec.md
/// Non-goals: no read-index optimization), so every operation here shares
/// the same commit-then-apply path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    Clear,
    CompareAndSet { key: String, expected: String, new: String },
    /// Carries a proposed membership change through to the apply path.
    ///
    /// The joint-consensus protocol for actually transitioning membership is
    /// an open question this crate does not implement (spec.md §9); the
    /// state machine accepts this as a no-op (§4.2).
    ChangeConfiguration { members: Vec<NodeId> },
}

impl Command {
    pub fn summary(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Set { .. } => "set",
            Command::Clear => "clear",
            Command::CompareAndSet { .. } => "compare_and_set",
            Command::ChangeConfiguration { .. } => "change_configuration",
        }
    }
}

/// A single position in the replicated log.
///
/// `command == None` marks a sentinel: either the boot sentinel `(0,0,None)`
/// or the anchor left behind at the snapshot boundary after compaction
/// (§3 invariant c).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: LogId,
    pub command: Option<Command>,
}

impl LogEntry {
    pub fn sentinel(log_id: LogId) -> Self {
        Self { log_id, command: None }
    }

    pub fn is_sentinel(&self) -> bool {
        self.command.is_none()
    }
}

/// The contiguous, sentinel-anchored log container described in spec.md §3.
///
/// Indices are 1-based. `entries[0]` is always the sentinel for whatever
/// position the log currently begins at (the boot sentinel `(0,0)` until a
/// snapshot has been taken, the snapshot pointer thereafter); real commands
/// start at `entries[1]`. This keeps `prev_log_index == 0` and
/// snapshot-boundary lookups uniform: both are just "find the entry at this
/// index", never a special empty-log case.
#[derive(Debug)]
pub struct RaftLog {
    /// `entries[i]` holds the entry at index `base_index() + i`.
    entries: Vec<LogEntry>,
}

impl RaftLog {
    /// A pristine log: a single `(0,0,None)` sentinel (§3 invariant d).
    pub fn new() -> Self {
        Self { entries: vec![LogEntry::sentinel(LogId::ZERO)] }
    }

    /// Rebuild a log from a persisted sequence of entries. The first entry
    /// is assumed to already be the correct sentinel.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        assert!(!entries.is_empty(), "a persisted log must retain its sentinel");
        Self { entries }
    }

    pub fn as_entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// The index covered by the log's leading sentinel (0 if no snapshot has
    /// ever been taken).
    pub fn base_index(&self) -> u64 {
        self.entries[0].log_id.index
    }

    pub fn last_log_id(&self) -> LogId {
        self.entries.last().expect("log is never empty").log_id
    }

    /// Look up the entry at `index`, if it is still retained.
    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        let base = self.base_index();
        if index < base {
            return None;
        }
        self.entries.get((index - base) as usize)
    }

    /// The term of the entry at `index`, or `None` if not retained
    /// (including the case where `index` predates the log entirely).
    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.get(index).map(|e| e.log_id.term)
    }

    /// Append a brand-new entry created by this node while it is leader.
    /// The caller is responsible for assigning the correct
    /// `last_log_id().index + 1`.
    pub fn append(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.log_id.index, self.last_log_id().index + 1);
        self.entries.push(entry);
    }

    /// Apply a replicated suffix from a leader (§4.5 step 4): entries
    /// matching the existing log are left untouched (idempotent replay must
    /// not truncate committed data); entries that conflict cause a
    /// truncation from that point on; entries past the end are appended.
    pub fn append_replicated(&mut self, entries: &[LogEntry]) {
        for entry in entries {
            match self.get(entry.log_id.index) {
                Some(existing) if existing.log_id.term == entry.log_id.term => {
                    // Already present and matching; leave it alone.
                    continue;
                }
                Some(_) => {
                    self.truncate_from(entry.log_id.index);
                    self.entries.push(entry.clone());
                }
                None => {
                    self.entries.push(entry.clone());
                }
            }
        }
    }

    /// Remove every entry from `index` onward (Leader Append-Only never
    /// calls this on its own log; only followers truncate, per §8 invariant).
    pub fn truncate_from(&mut self, index: u64) {
        let base = self.base_index();
        if index <= base {
            // Never truncate the sentinel itself.
            return;
        }
        let keep = (index - base) as usize;
        self.entries.truncate(keep);
    }

    /// Drop every entry at or before `up_to`, replacing the prefix with a
    /// fresh sentinel at `up_to`'s (term, index) (§3 invariant c, §4.4
    /// compaction).
    pub fn compact_to(&mut self, up_to: LogId) {
        if up_to.index <= self.base_index() {
            return; // already compacted at least this far (compaction idempotence, §8).
        }
        let keep_from = (up_to.index - self.base_index()) as usize;
        let mut remaining = self.entries.split_off(keep_from.min(self.entries.len()));
        if remaining.first().map(|e| e.log_id) != Some(up_to) {
            remaining.insert(0, LogEntry::sentinel(up_to));
        }
        self.entries = remaining;
    }

    /// Whether the candidate's log (per §4.6 election rule) is at least as
    /// up-to-date as this log.
    pub fn is_candidate_log_up_to_date(&self, candidate_last: LogId) -> bool {
        let ours = self.last_log_id();
        candidate_last.term > ours.term || (candidate_last.term == ours.term && candidate_last.index >= ours.index)
    }

    /// Number of entries retained since the last snapshot (including the
    /// sentinel), used to gate compaction.
    pub fn len_since_snapshot(&self) -> u64 {
        self.entries.len() as u64
    }
}

impl Default for RaftLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(n: u64) -> Command {
        Command::Set { key: n.to_string(), value: n.to_string() }
    }

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry { log_id: LogId::new(term, index), command: Some(cmd(index)) }
    }

    #[test]
    fn fresh_log_has_zero_sentinel() {
        let log = RaftLog::new();
        assert_eq!(log.last_log_id(), LogId::ZERO);
        assert_eq!(log.base_index(), 0);
        assert!(log.get(0).unwrap().is_sentinel());
    }

    #[test]
    fn append_and_lookup() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));
        assert_eq!(log.last_log_id(), LogId::new(1, 2));
        assert_eq!(log.term_at(1), Some(1));
        assert_eq!(log.term_at(2), Some(1));
        assert_eq!(log.term_at(3), None);
    }

    #[test]
    fn replicated_matching_entries_are_not_truncated() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));
        // Replay of the same two entries must be a no-op, not a truncation.
        log.append_replicated(&[entry(1, 1), entry(1, 2)]);
        assert_eq!(log.last_log_id(), LogId::new(1, 2));
    }

    #[test]
    fn conflicting_entry_truncates_suffix() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));
        log.append(entry(1, 3));
        // A new leader's entry at index 2 with a different term conflicts.
        log.append_replicated(&[LogEntry { log_id: LogId::new(2, 2), command: Some(cmd(99)) }]);
        assert_eq!(log.last_log_id(), LogId::new(2, 2));
        assert_eq!(log.term_at(3), None);
    }

    #[test]
    fn compaction_leaves_sentinel_at_boundary() {
        let mut log = RaftLog::new();
        for i in 1..=5 {
            log.append(entry(1, i));
        }
        log.compact_to(LogId::new(1, 3));
        assert_eq!(log.base_index(), 3);
        assert!(log.get(3).unwrap().is_sentinel());
        assert_eq!(log.get(4).unwrap().log_id, LogId::new(1, 4));
        assert_eq!(log.get(1), None);
    }

    #[test]
    fn compaction_is_idempotent() {
        let mut log = RaftLog::new();
        for i in 1..=5 {
            log.append(entry(1, i));
        }
        log.compact_to(LogId::new(1, 3));
        let before = log.as_entries().to_vec();
        log.compact_to(LogId::new(1, 2)); // j <= i: no-op
        assert_eq!(log.as_entries(), before.as_slice());
    }

    #[test]
    fn up_to_date_rule_prefers_higher_term_then_longer_log() {
        let mut log = RaftLog::new();
        log.append(entry(2, 1));
        assert!(log.is_candidate_log_up_to_date(LogId::new(2, 1)));
        assert!(log.is_candidate_log_up_to_date(LogId::new(3, 0)));
        assert!(!log.is_candidate_log_up_to_date(LogId::new(1, 5)));
        assert!(!log.is_candidate_log_up_to_date(LogId::new(2, 0)));
    }
}
