use super::SnapshotReceiver;
use crate::storage::snapshot_tmp_file_name;
use crate::SnapshotInfo;
use crate::Version;

fn info(index: u64) -> SnapshotInfo {
    SnapshotInfo {
        last_included: Version::new(index, 1),
    }
}

/// # Case 1: Chunks append sequentially and sizes accumulate
///
/// ## Validation Criterias:
/// 1. A fresh receive file starts at size 0
/// 2. Each append returns the cumulative size
#[test]
fn test_append_case1() {
    let dir = tempfile::tempdir().expect("should succeed");
    let mut receiver = SnapshotReceiver::open(dir.path(), info(7)).expect("should succeed");

    assert_eq!(receiver.size().expect("should succeed"), 0);
    assert_eq!(receiver.append(&[0u8; 80]).expect("should succeed"), 80);
    assert_eq!(receiver.append(&[0u8; 20]).expect("should succeed"), 100);
    assert!(dir.path().join(snapshot_tmp_file_name(7)).exists());
}

/// # Case 2: Discard removes the partial file
///
/// ## Validation Criterias:
/// 1. The temp file is gone after `discard`
#[test]
fn test_discard_case2() {
    let dir = tempfile::tempdir().expect("should succeed");
    let mut receiver = SnapshotReceiver::open(dir.path(), info(3)).expect("should succeed");
    receiver.append(b"partial").expect("should succeed");

    receiver.discard();
    assert!(!dir.path().join(snapshot_tmp_file_name(3)).exists());
}

/// # Case 3: Reopening the same transfer truncates the file
///
/// ## Validation Criterias:
/// 1. A second `open` for the same identity starts over at size 0
#[test]
fn test_reopen_truncates_case3() {
    let dir = tempfile::tempdir().expect("should succeed");
    let mut receiver = SnapshotReceiver::open(dir.path(), info(5)).expect("should succeed");
    receiver.append(b"stale bytes").expect("should succeed");
    drop(receiver);

    let receiver = SnapshotReceiver::open(dir.path(), info(5)).expect("should succeed");
    assert_eq!(receiver.size().expect("should succeed"), 0);
}
