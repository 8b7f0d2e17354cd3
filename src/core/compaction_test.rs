use std::fs::File;
use std::sync::Arc;

use super::CompactionWorker;
use crate::storage::write_version_header;
use crate::test_utils::build_node;
use crate::test_utils::make_entry;
use crate::test_utils::test_config;
use crate::test_utils::write_snapshot_file;
use crate::LogStore;
use crate::MemLogStore;
use crate::MockStateMachine;
use crate::NodeBuilder;
use crate::StateMachine;
use crate::Version;

/// # Case 1: One pass discards at most half of the retained entries
///
/// ## Validation Criterias:
/// 1. With 10 entries all covered by the snapshot, exactly 5 are discarded
/// 2. A second pass discards the rest (still bounded)
#[tokio::test]
async fn test_discard_bound_case1() {
    let dir = tempfile::tempdir().expect("should succeed");
    let (node, log_store, _state_machine) = build_node(dir.path(), Vec::new());
    for index in 1..=10u64 {
        log_store.append(make_entry(index, 1)).expect("should succeed");
    }
    node.meta.lock().last_log_index = 10;
    write_snapshot_file(
        &node.config.snapshot.snapshot_dir,
        Version::new(10, 1),
        b"state",
    );

    let worker = CompactionWorker::new(node.clone());
    worker.do_compaction_log().expect("should succeed");
    assert_eq!(log_store.entry_count(), 5);
    assert_eq!(log_store.first_index(), 6);

    worker.do_compaction_log().expect("should succeed");
    assert_eq!(log_store.entry_count(), 3);
    assert_eq!(log_store.first_index(), 8);
}

/// # Case 2: Nothing discardable triggers exactly one snapshot attempt
///
/// ## Validation Criterias:
/// 1. With no snapshot on disk the state machine is asked for one
/// 2. The produced temp file is committed as `<index>.snapshot`
/// 3. The retry pass then discards covered entries
#[tokio::test]
async fn test_snapshot_then_discard_case2() {
    let dir = tempfile::tempdir().expect("should succeed");
    let log_store = Arc::new(MemLogStore::new());
    for index in 1..=8u64 {
        log_store.append(make_entry(index, 1)).expect("should succeed");
    }

    let mut state_machine = MockStateMachine::new();
    state_machine
        .expect_make_snapshot()
        .times(1)
        .returning(|snapshot_dir| {
            let tmp = snapshot_dir.join("pending.snapshot_tmp");
            let mut file = File::create(&tmp)?;
            write_version_header(&mut file, &Version::new(4, 1))?;
            Ok(tmp)
        });

    let node = NodeBuilder::new(1, test_config(dir.path()))
        .log_store(log_store.clone() as Arc<dyn LogStore>)
        .state_machine(Arc::new(state_machine) as Arc<dyn StateMachine>)
        .build()
        .expect("should succeed");
    node.meta.lock().last_log_index = 8;

    let worker = CompactionWorker::new(node.clone());
    worker.do_compaction_log().expect("should succeed");

    let snapshot_dir = &node.config.snapshot.snapshot_dir;
    assert!(snapshot_dir.join(crate::storage::snapshot_file_name(4)).exists());
    assert_eq!(log_store.first_index(), 5);
    assert_eq!(log_store.entry_count(), 4);
}

/// # Case 3: A useless snapshot attempt is not repeated
///
/// ## Validation Criterias:
/// 1. When the fresh snapshot covers nothing, the pass stops after one
///    make_snapshot call
#[tokio::test]
async fn test_single_snapshot_attempt_case3() {
    let dir = tempfile::tempdir().expect("should succeed");
    let log_store = Arc::new(MemLogStore::new());
    for index in 5..=8u64 {
        log_store.append(make_entry(index, 1)).expect("should succeed");
    }

    let mut state_machine = MockStateMachine::new();
    state_machine
        .expect_make_snapshot()
        .times(1)
        .returning(|snapshot_dir| {
            // watermark below the retained range: covers nothing
            let tmp = snapshot_dir.join("pending.snapshot_tmp");
            let mut file = File::create(&tmp)?;
            write_version_header(&mut file, &Version::new(2, 1))?;
            Ok(tmp)
        });

    let node = NodeBuilder::new(1, test_config(dir.path()))
        .log_store(log_store.clone() as Arc<dyn LogStore>)
        .state_machine(Arc::new(state_machine) as Arc<dyn StateMachine>)
        .build()
        .expect("should succeed");
    node.meta.lock().last_log_index = 8;

    let worker = CompactionWorker::new(node.clone());
    worker.do_compaction_log().expect("should succeed");
    assert_eq!(log_store.entry_count(), 4);
}

/// # Case 4: Compaction runs are single-flight
///
/// ## Validation Criterias:
/// 1. While the flag is held no second run is spawned
/// 2. A finished run clears the flag
#[tokio::test]
async fn test_single_flight_case4() {
    let dir = tempfile::tempdir().expect("should succeed");
    let (node, _log_store, _state_machine) = build_node(dir.path(), Vec::new());

    *node.compacting_log.lock() = true;
    node.async_compact_log();
    assert!(node.compaction_handle.lock().is_none());

    *node.compacting_log.lock() = false;
    node.async_compact_log();
    let handle = node.compaction_handle.lock().take().expect("should spawn");
    handle.await.expect("should succeed");
    assert!(!node.check_compacting_log());
}
