//! Background applier of committed log entries.
//!
//! Parked on the node's apply signal; each wake applies every entry in
//! `(applied_index, committed_index]` strictly in ascending order. A failure
//! leaves `applied_index` untouched so the next wake retries from the same
//! entry.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::EntryKind;
use crate::Node;
use crate::Result;
use crate::StorageError;
use crate::Version;

pub(crate) struct ApplyWorker {
    node: Arc<Node>,
    shutdown_signal: watch::Receiver<()>,
}

impl ApplyWorker {
    pub(crate) fn new(
        node: Arc<Node>,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            node,
            shutdown_signal,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            // Register for the wake signal before re-checking state so a
            // commit advancing concurrently is never missed.
            let notified = self.node.apply_notify.notified();
            tokio::select! {
                biased;
                // P0: shutdown received;
                _ = self.shutdown_signal.changed() => {
                    warn!("[ApplyWorker] shutdown signal received.");
                    return;
                }
                _ = notified => {
                    if let Err(e) = self.apply_committed_entries() {
                        error!("apply committed entries failed: {:?}", e);
                    }
                }
            }
        }
    }

    /// Applies every committed, not-yet-applied entry in index order,
    /// advancing `applied_index` after each success.
    pub(crate) fn apply_committed_entries(&self) -> Result<()> {
        let committed_index = self.node.committed_index();
        let mut next = self.node.applied_index() + 1;

        while next <= committed_index {
            let entry = match self.node.log_store.entry(next)? {
                Some(entry) => entry,
                None => {
                    return Err(StorageError::LogStorage(format!(
                        "log entry {next} missing while applying"
                    ))
                    .into());
                }
            };

            if entry.kind == EntryKind::Normal {
                let version = Version::new(entry.index, entry.term);
                self.node.state_machine.apply(&entry.payload, version)?;
            }
            self.node.set_applied_index(next);
            debug!("applied log entry {}", next);
            next += 1;
        }
        Ok(())
    }
}
