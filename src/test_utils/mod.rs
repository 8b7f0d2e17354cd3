//! Shared fixtures for unit tests.

use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::write_version_header;
use crate::storage::snapshot_file_name;
use crate::EntryKind;
use crate::LogEntry;
use crate::LogStore;
use crate::MemLogStore;
use crate::Node;
use crate::NodeBuilder;
use crate::Peer;
use crate::RaftConfig;
use crate::Result;
use crate::StateMachine;
use crate::StorageError;
use crate::Version;

pub fn make_entry(
    index: u64,
    term: u64,
) -> LogEntry {
    LogEntry {
        index,
        term,
        kind: EntryKind::Normal,
        payload: format!("entry-{index}").into_bytes(),
    }
}

pub fn make_entries(pairs: &[(u64, u64)]) -> Vec<LogEntry> {
    pairs.iter().map(|&(index, term)| make_entry(index, term)).collect()
}

/// A config pointing its snapshot directory at `dir`, with a tight election
/// window so timer tests stay fast, seeded for reproducibility.
pub fn test_config(dir: &Path) -> RaftConfig {
    let mut config = RaftConfig::default();
    config.snapshot.snapshot_dir = dir.join("snapshots");
    config.election.election_timeout_min = 50;
    config.election.election_timeout_max = 100;
    config.election.timer_seed = Some(42);
    config
}

/// Writes a committed snapshot file (`<index>.snapshot`) with the given
/// watermark header and payload, returning its path.
pub fn write_snapshot_file(
    dir: &Path,
    version: Version,
    payload: &[u8],
) -> PathBuf {
    std::fs::create_dir_all(dir).expect("should succeed");
    let path = dir.join(snapshot_file_name(version.index));
    let mut file = File::create(&path).expect("should succeed");
    write_version_header(&mut file, &version).expect("should succeed");
    std::io::Write::write_all(&mut file, payload).expect("should succeed");
    path
}

/// A [`Peer`] stub with atomic cursors and notification counters.
#[derive(Default)]
pub struct StaticPeer {
    next_index: AtomicU64,
    match_index: AtomicU64,
    pub election_notifications: AtomicU64,
    pub replicate_notifications: AtomicU64,
}

impl StaticPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_match_index(match_index: u64) -> Arc<Self> {
        let peer = Self::default();
        peer.match_index.store(match_index, Ordering::SeqCst);
        Arc::new(peer)
    }

    pub fn election_count(&self) -> u64 {
        self.election_notifications.load(Ordering::SeqCst)
    }

    pub fn replicate_count(&self) -> u64 {
        self.replicate_notifications.load(Ordering::SeqCst)
    }
}

impl Peer for StaticPeer {
    fn notify_election(&self) {
        self.election_notifications.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_replicate(&self) {
        self.replicate_notifications.fetch_add(1, Ordering::SeqCst);
    }

    fn next_index(&self) -> u64 {
        self.next_index.load(Ordering::SeqCst)
    }

    fn set_next_index(
        &self,
        index: u64,
    ) {
        self.next_index.store(index, Ordering::SeqCst);
    }

    fn match_index(&self) -> u64 {
        self.match_index.load(Ordering::SeqCst)
    }

    fn set_match_index(
        &self,
        index: u64,
    ) {
        self.match_index.store(index, Ordering::SeqCst);
    }
}

/// A [`StateMachine`] that records applied versions and can be scripted to
/// fail at one index.
#[derive(Default)]
pub struct RecordingStateMachine {
    applied: Mutex<Vec<Version>>,
    fail_at_index: Mutex<Option<u64>>,
    loaded_snapshots: Mutex<Vec<PathBuf>>,
}

impl RecordingStateMachine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn applied(&self) -> Vec<Version> {
        self.applied.lock().clone()
    }

    pub fn fail_at(
        &self,
        index: Option<u64>,
    ) {
        *self.fail_at_index.lock() = index;
    }

    pub fn loaded_snapshots(&self) -> Vec<PathBuf> {
        self.loaded_snapshots.lock().clone()
    }
}

impl StateMachine for RecordingStateMachine {
    fn apply(
        &self,
        _payload: &[u8],
        version: Version,
    ) -> Result<()> {
        if *self.fail_at_index.lock() == Some(version.index) {
            return Err(StorageError::LogStorage(format!(
                "scripted apply failure at {}",
                version.index
            ))
            .into());
        }
        self.applied.lock().push(version);
        Ok(())
    }

    fn make_snapshot(
        &self,
        _dir: &Path,
    ) -> Result<PathBuf> {
        Err(StorageError::Snapshot("not supported by RecordingStateMachine".to_string()).into())
    }

    fn load_snapshot(
        &self,
        path: &Path,
    ) -> Result<()> {
        self.loaded_snapshots.lock().push(path.to_path_buf());
        Ok(())
    }
}

/// Builds a started-but-idle node over a [`MemLogStore`] with the given
/// peers. The node's background tasks are NOT spawned; tests drive the
/// callbacks directly.
pub fn build_node(
    dir: &Path,
    peers: Vec<(u32, Arc<dyn Peer>)>,
) -> (Arc<Node>, Arc<MemLogStore>, Arc<RecordingStateMachine>) {
    let log_store = Arc::new(MemLogStore::new());
    let state_machine = RecordingStateMachine::new();
    let mut builder = NodeBuilder::new(1, test_config(dir))
        .log_store(log_store.clone() as Arc<dyn LogStore>)
        .state_machine(state_machine.clone() as Arc<dyn StateMachine>);
    for (peer_id, peer) in peers {
        builder = builder.add_peer(peer_id, peer);
    }
    let node = builder.build().expect("should succeed");
    (node, log_store, state_machine)
}
