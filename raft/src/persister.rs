//! Durable storage for the two things a crashed node must recover before it
//! can safely rejoin the cluster (§4.9, §7): the hard state (`current_term`,
//! `voted_for`, and the log) and, separately, the latest state machine
//! snapshot.

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::log::LogEntry;
use crate::NodeId;

/// The durable fields a node must never lose or roll back across a crash
/// (§4.9: `current_term`, `voted_for`, and the committed-through-uncommitted
/// log contents).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RaftState {
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,
}

/// Storage for Raft's durable state, supplied by the embedding application.
///
/// Per §7's persistence-before-ack rule, every call here must have returned
/// successfully before the corresponding RPC is acknowledged or the
/// corresponding vote is cast. A failure from any method here is treated as
/// fatal by the core (§4.9): the node cannot safely continue.
#[async_trait]
pub trait Persister: Send + Sync + 'static {
    /// Persist the current hard state, overwriting whatever was there before.
    async fn save_raft_state(&self, state: &RaftState) -> anyhow::Result<()>;

    /// Read back the last persisted hard state, if any exists yet.
    async fn read_raft_state(&self) -> anyhow::Result<Option<RaftState>>;

    /// Persist a state machine snapshot, overwriting whatever was there
    /// before.
    async fn save_snapshot(&self, bytes: &[u8]) -> anyhow::Result<()>;

    /// Read back the last persisted snapshot, if any exists yet.
    async fn read_snapshot(&self) -> anyhow::Result<Option<Vec<u8>>>;

    /// The size in bytes of the currently persisted snapshot, 0 if none
    /// exists yet (§4.1 `SnapshotSize`). Callers use this to decide when a
    /// snapshot has grown large enough to warrant operational attention;
    /// the core itself never consults it.
    async fn snapshot_size(&self) -> anyhow::Result<u64>;
}

/// A [`Persister`] backed by two files on disk, written atomically via a
/// write-to-temp-then-rename so a crash mid-write can never leave a
/// half-written file behind for the next restart to read.
pub struct FilePersister {
    state_path: PathBuf,
    snapshot_path: PathBuf,
    // Serializes writers so two concurrent saves can't race on the same
    // temp-file name; reads don't need this since `fs::rename` is atomic.
    write_lock: Mutex<()>,
}

impl FilePersister {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            state_path: dir.join("raft_state.bin"),
            snapshot_path: dir.join("snapshot.bin"),
            write_lock: Mutex::new(()),
        }
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn read_opt(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Persister for FilePersister {
    async fn save_raft_state(&self, state: &RaftState) -> anyhow::Result<()> {
        let bytes = bincode::serialize(state)?;
        let _guard = self.write_lock.lock().await;
        Self::write_atomic(&self.state_path, &bytes).await
    }

    async fn read_raft_state(&self) -> anyhow::Result<Option<RaftState>> {
        let bytes = Self::read_opt(&self.state_path).await?;
        bytes.map(|b| bincode::deserialize(&b).map_err(Into::into)).transpose()
    }

    async fn save_snapshot(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        Self::write_atomic(&self.snapshot_path, bytes).await
    }

    async fn read_snapshot(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Self::read_opt(&self.snapshot_path).await
    }

    async fn snapshot_size(&self) -> anyhow::Result<u64> {
        match tokio::fs::metadata(&self.snapshot_path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// An in-memory [`Persister`] for tests, exercising the same trait contract
/// without touching a filesystem.
#[derive(Default)]
pub struct MemPersister {
    inner: Mutex<MemPersisterInner>,
}

#[derive(Default)]
struct MemPersisterInner {
    state: Option<RaftState>,
    snapshot: Option<Vec<u8>>,
}

impl MemPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persister for MemPersister {
    async fn save_raft_state(&self, state: &RaftState) -> anyhow::Result<()> {
        self.inner.lock().await.state = Some(state.clone());
        Ok(())
    }

    async fn read_raft_state(&self) -> anyhow::Result<Option<RaftState>> {
        Ok(self.inner.lock().await.state.clone())
    }

    async fn save_snapshot(&self, bytes: &[u8]) -> anyhow::Result<()> {
        self.inner.lock().await.snapshot = Some(bytes.to_vec());
        Ok(())
    }

    async fn read_snapshot(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().await.snapshot.clone())
    }

    async fn snapshot_size(&self) -> anyhow::Result<u64> {
        Ok(self.inner.lock().await.snapshot.as_ref().map_or(0, |s| s.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogId;

    #[tokio::test]
    async fn mem_persister_round_trips_state() {
        let p = MemPersister::new();
        assert!(p.read_raft_state().await.unwrap().is_none());

        let state = RaftState {
            current_term: 3,
            voted_for: Some(2),
            log: vec![LogEntry::sentinel(LogId::new(1, 1))],
        };
        p.save_raft_state(&state).await.unwrap();
        let read_back = p.read_raft_state().await.unwrap().unwrap();
        assert_eq!(read_back.current_term, 3);
        assert_eq!(read_back.voted_for, Some(2));
    }

    #[tokio::test]
    async fn snapshot_size_reflects_the_latest_save() {
        let p = MemPersister::new();
        assert_eq!(p.snapshot_size().await.unwrap(), 0);
        p.save_snapshot(b"12345").await.unwrap();
        assert_eq!(p.snapshot_size().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn file_persister_round_trips_across_instances() {
        let dir = tempdir();
        let state = RaftState { current_term: 7, voted_for: None, log: vec![LogEntry::sentinel(LogId::ZERO)] };

        {
            let p = FilePersister::new(&dir);
            p.save_raft_state(&state).await.unwrap();
            p.save_snapshot(b"snapshot-bytes").await.unwrap();
        }

        let p = FilePersister::new(&dir);
        let read_back = p.read_raft_state().await.unwrap().unwrap();
        assert_eq!(read_back.current_term, 7);
        assert_eq!(p.read_snapshot().await.unwrap().unwrap(), b"snapshot-bytes");
        assert_eq!(p.snapshot_size().await.unwrap(), "snapshot-bytes".len() as u64);
    }

    #[tokio::test]
    async fn file_persister_overwrites_atomically() {
        let dir = tempdir();
        let p = FilePersister::new(&dir);
        for term in 1..=5 {
            let state = RaftState { current_term: term, voted_for: None, log: vec![LogEntry::sentinel(LogId::ZERO)] };
            p.save_raft_state(&state).await.unwrap();
        }
        assert_eq!(p.read_raft_state().await.unwrap().unwrap().current_term, 5);
    }

    /// A throwaway directory cleaned up when the returned guard drops.
    fn tempdir() -> TempDir {
        let mut path = std::env::temp_dir();
        path.push(format!("raft-persister-test-{}-{:?}", std::process::id(), std::thread::current().id()));
        std::fs::create_dir_all(&path).unwrap();
        TempDir(path)
    }

    struct TempDir(PathBuf);

    impl AsRef<Path> for TempDir {
        fn as_ref(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
