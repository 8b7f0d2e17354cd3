use tokio::sync::oneshot::error::TryRecvError;

use super::majority_index;
use super::ReplicateStatus;
use super::WaiterTable;

/// # Case 1: Waiters resolve in ascending order up to the commit index
///
/// ## Validation Criterias:
/// 1. Waiters at [3, 5, 5, 8] with commit at 5 resolve exactly the first
///    three with `Committed`
/// 2. The waiter at 8 stays pending
#[tokio::test]
async fn test_resolve_up_to_case1() {
    let table = WaiterTable::new();
    let rx3 = table.register(3);
    let rx5a = table.register(5);
    let rx5b = table.register(5);
    let mut rx8 = table.register(8);
    assert_eq!(table.pending(), 4);

    table.resolve_up_to(5, ReplicateStatus::Committed);

    assert_eq!(rx3.await.expect("should succeed"), ReplicateStatus::Committed);
    assert_eq!(rx5a.await.expect("should succeed"), ReplicateStatus::Committed);
    assert_eq!(rx5b.await.expect("should succeed"), ReplicateStatus::Committed);
    assert_eq!(rx8.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(table.pending(), 1);
}

/// # Case 2: Losing leadership resolves everything with NoLeader
///
/// ## Validation Criterias:
/// 1. All pending waiters receive `NoLeader`
/// 2. The table is left empty
#[tokio::test]
async fn test_resolve_all_case2() {
    let table = WaiterTable::new();
    let rx1 = table.register(1);
    let rx9 = table.register(9);

    table.resolve_all(ReplicateStatus::NoLeader);

    assert_eq!(rx1.await.expect("should succeed"), ReplicateStatus::NoLeader);
    assert_eq!(rx9.await.expect("should succeed"), ReplicateStatus::NoLeader);
    assert_eq!(table.pending(), 0);
}

/// # Case 3: A dropped receiver does not wedge resolution
///
/// ## Validation Criterias:
/// 1. Resolving past an abandoned waiter succeeds and clears it
#[tokio::test]
async fn test_dropped_receiver_case3() {
    let table = WaiterTable::new();
    drop(table.register(2));
    let rx4 = table.register(4);

    table.resolve_up_to(4, ReplicateStatus::Committed);
    assert_eq!(rx4.await.expect("should succeed"), ReplicateStatus::Committed);
    assert_eq!(table.pending(), 0);
}

/// # Case 4: Majority index over a 5-node match vector
///
/// ## Validation Criterias:
/// 1. Leader at 7 with peers [7, 6, 3, 0] commits 6
/// 2. A lone node commits its own last index
#[test]
fn test_majority_index_case4() {
    assert_eq!(majority_index(vec![7, 6, 3, 0, 7]), 6);
    assert_eq!(majority_index(vec![5]), 5);
    assert_eq!(majority_index(vec![2, 2, 2]), 2);
}
