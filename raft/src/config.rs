//! Runtime configuration for a Raft node (§6 Configuration, §4.6 election timing).

use rand::Rng;

use crate::NodeId;

/// Tunables for a single Raft node.
///
/// Mirrors the configuration surface spec.md calls out explicitly: peer
/// identities and listen addresses live in the embedding application's own
/// config (see `kvstore::config::NodeConfig`); this struct carries only the
/// knobs the consensus core itself consults.
#[derive(Clone, Debug)]
pub struct Config {
    /// This node's own id, used to break ties and to identify "self" in the
    /// peer set.
    pub id: NodeId,

    /// Lower bound, in milliseconds, of the randomized election timeout range.
    pub election_timeout_min_ms: u64,
    /// Upper bound, in milliseconds, of the randomized election timeout range.
    pub election_timeout_max_ms: u64,
    /// Interval, in milliseconds, at which a leader sends heartbeats.
    pub heartbeat_interval_ms: u64,

    /// Number of log entries since the last snapshot after which compaction
    /// fires. `None` disables compaction entirely.
    pub compaction_threshold: Option<u64>,
}

impl Config {
    /// Build a config with the defaults spec.md documents: a 1000-4000ms
    /// randomized election timeout and a 500ms heartbeat, compaction
    /// disabled.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            election_timeout_min_ms: 1000,
            election_timeout_max_ms: 4000,
            heartbeat_interval_ms: 500,
            compaction_threshold: None,
        }
    }

    pub fn with_compaction_threshold(mut self, threshold: Option<u64>) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    pub fn with_election_timeout_ms(mut self, min: u64, max: u64) -> Self {
        self.election_timeout_min_ms = min;
        self.election_timeout_max_ms = max;
        self
    }

    /// Draw a new random election timeout within the configured bounds.
    pub fn new_rand_election_timeout(&self) -> u64 {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return self.election_timeout_min_ms;
        }
        rand::thread_rng().gen_range(self.election_timeout_min_ms..self.election_timeout_max_ms)
    }
}
