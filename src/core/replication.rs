//! Client-write synchronization and commit-quorum computation.
//!
//! Every in-flight client write parks on a one-shot channel keyed by its log
//! index. As the commit index advances the table resolves waiters in strictly
//! ascending index order; losing leadership resolves everything that is left.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome delivered to a parked client write. Each waiter sees exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateStatus {
    /// The entry is durably present on a quorum.
    Committed,
    /// Leadership was lost while the write was in flight; commitment can no
    /// longer be guaranteed.
    NoLeader,
}

pub(crate) struct WaiterTable {
    waiters: Mutex<BTreeMap<u64, Vec<oneshot::Sender<ReplicateStatus>>>>,
}

impl WaiterTable {
    pub(crate) fn new() -> Self {
        Self {
            waiters: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers a waiter for `index` and hands back its receiving end.
    pub(crate) fn register(
        &self,
        index: u64,
    ) -> oneshot::Receiver<ReplicateStatus> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().entry(index).or_default().push(tx);
        rx
    }

    /// Resolves every waiter with key `<= index`, in ascending index order.
    pub(crate) fn resolve_up_to(
        &self,
        index: u64,
        status: ReplicateStatus,
    ) {
        let resolved = {
            let mut waiters = self.waiters.lock();
            let pending = match index.checked_add(1) {
                Some(bound) => waiters.split_off(&bound),
                None => BTreeMap::new(),
            };
            std::mem::replace(&mut *waiters, pending)
        };
        for (log_index, senders) in resolved {
            debug!("resolve replicate waiter at index {} with {:?}", log_index, status);
            for tx in senders {
                // The receiver may have given up (timeout); nothing to do.
                let _ = tx.send(status);
            }
        }
    }

    /// Resolves every pending waiter, in ascending index order.
    pub(crate) fn resolve_all(
        &self,
        status: ReplicateStatus,
    ) {
        self.resolve_up_to(u64::MAX, status);
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.waiters.lock().values().map(|senders| senders.len()).sum()
    }
}

/// The highest log index durably present on a strict majority of the cluster:
/// the `⌊count/2⌋`-th element of the sorted match-index multiset (peers'
/// match indexes plus the leader's own last index).
pub(crate) fn majority_index(mut match_indexes: Vec<u64>) -> u64 {
    match_indexes.sort_unstable();
    match_indexes[match_indexes.len() / 2]
}
