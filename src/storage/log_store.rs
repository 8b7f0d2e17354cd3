//! Core model in Raft: the durable replicated log.

use crate::LogEntry;
use crate::Result;

#[cfg(test)]
use mockall::automock;

/// Durable, ordered log of entries keyed by a monotonically increasing
/// 1-based index.
///
/// Implementations serialize concurrent writers internally: `append`,
/// `truncate_from` and `discard_up_to` are atomic single operations from the
/// node's perspective.
#[cfg_attr(test, automock)]
pub trait LogStore: Send + Sync + 'static {
    /// Durably appends one entry at `entry.index`, returning that index.
    fn append(
        &self,
        entry: LogEntry,
    ) -> Result<u64>;

    /// Point read. `Ok(None)` for indices outside the retained range.
    fn entry(
        &self,
        index: u64,
    ) -> Result<Option<LogEntry>>;

    /// Reads consecutive entries starting at `from`, stopping at the first
    /// gap or once `max_bytes` of payload or `max_count` entries have been
    /// collected (at least one entry is returned when `from` is retained).
    fn read_range(
        &self,
        from: u64,
        max_bytes: u64,
        max_count: u64,
    ) -> Result<Vec<LogEntry>>;

    /// Removes `index` and everything after it (uncommitted-suffix conflict
    /// resolution).
    fn truncate_from(
        &self,
        index: u64,
    ) -> Result<()>;

    /// Removes all entries with index `<= index` (compacted prefix), returning
    /// how many were discarded.
    fn discard_up_to(
        &self,
        index: u64,
    ) -> Result<u64>;

    /// First retained index, or 0 when the log is empty.
    fn first_index(&self) -> u64;

    /// Highest index ever appended (survives prefix discard), or 0.
    fn last_index(&self) -> u64;

    /// Term of the entry at `last_index()`, or 0 for an empty log.
    fn last_term(&self) -> u64;

    /// Number of currently retained entries.
    fn entry_count(&self) -> u64;
}
