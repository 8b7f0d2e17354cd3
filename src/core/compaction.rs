//! Background log compaction.
//!
//! Single-flight: the node sets its compacting flag before spawning a run and
//! the run clears it on exit. One invocation discards at most half of the
//! currently retained entries and makes at most one snapshot-creation
//! attempt, so it always terminates quickly and makes forward progress when
//! any is possible.

use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::info;

use crate::storage::latest_snapshot;
use crate::storage::read_version_from;
use crate::storage::snapshot_file_name;
use crate::Node;
use crate::Result;
use crate::StorageError;

pub(crate) struct CompactionWorker {
    node: Arc<Node>,
}

impl CompactionWorker {
    pub(crate) fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    pub(crate) async fn run(self) {
        if let Err(e) = self.do_compaction_log() {
            error!("log compaction failed: {:?}", e);
        }
        *self.node.compacting_log.lock() = false;
    }

    /// One compaction pass: discard what the newest snapshot covers; if
    /// nothing was discardable, create a snapshot and retry the discard once.
    pub(crate) fn do_compaction_log(&self) -> Result<()> {
        let mut snapshot_attempted = false;
        loop {
            let discarded = self.discard_covered_entries()?;
            if discarded > 0 {
                info!("compaction discarded {} log entries", discarded);
                return Ok(());
            }
            if snapshot_attempted {
                debug!("nothing to discard after snapshot attempt, stopping");
                return Ok(());
            }
            snapshot_attempted = true;
            self.make_snapshot()?;
        }
    }

    /// Discards entries covered by the newest snapshot, bounded to half of
    /// the currently retained entries per invocation.
    fn discard_covered_entries(&self) -> Result<u64> {
        let snapshot_dir = &self.node.config.snapshot.snapshot_dir;
        let Some((version, _)) = latest_snapshot(snapshot_dir)? else {
            debug!("no snapshot exists, nothing to discard");
            return Ok(0);
        };

        let log_store = &self.node.log_store;
        let first_index = log_store.first_index();
        let total = log_store.entry_count();
        if first_index == 0 || total == 0 || version.index < first_index {
            return Ok(0);
        }

        // Bound the cost of one pass: never drop more than half of the
        // retained entries at once.
        let half = total / 2;
        if half == 0 {
            return Ok(0);
        }
        let max_cutoff = first_index + half - 1;
        let cutoff = version.index.min(max_cutoff);
        if cutoff < first_index {
            return Ok(0);
        }
        log_store.discard_up_to(cutoff)
    }

    /// Asks the state machine for a fresh snapshot and commits it under its
    /// final `<index>.snapshot` name.
    fn make_snapshot(&self) -> Result<()> {
        let snapshot_dir = &self.node.config.snapshot.snapshot_dir;
        let tmp_path = self.node.state_machine.make_snapshot(snapshot_dir)?;
        let version = read_version_from(&tmp_path)?;

        let dest = snapshot_dir.join(snapshot_file_name(version.index));
        std::fs::rename(&tmp_path, &dest).map_err(|e| StorageError::PathError {
            path: dest.clone(),
            source: e,
        })?;
        info!("make_snapshot done: {:?} at {:?}", version, dest);
        Ok(())
    }
}
