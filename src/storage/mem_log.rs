//! In-memory [`LogStore`] adaptor.
//!
//! Useful for embedders that keep the replicated log elsewhere (or nowhere)
//! and for tests. Entry data is not durable across restarts.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::LogEntry;
use crate::LogStore;
use crate::Result;

#[derive(Default)]
pub struct MemLogStore {
    inner: RwLock<MemLogInner>,
}

#[derive(Default)]
struct MemLogInner {
    entries: BTreeMap<u64, LogEntry>,
    // The logical tail survives a full prefix discard after a snapshot
    // install, so it is tracked independently of the map.
    last_index: u64,
    last_term: u64,
}

impl MemLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemLogStore {
    fn append(
        &self,
        entry: LogEntry,
    ) -> Result<u64> {
        let mut inner = self.inner.write();
        let index = entry.index;
        if index >= inner.last_index {
            inner.last_index = index;
            inner.last_term = entry.term;
        }
        inner.entries.insert(index, entry);
        Ok(index)
    }

    fn entry(
        &self,
        index: u64,
    ) -> Result<Option<LogEntry>> {
        Ok(self.inner.read().entries.get(&index).cloned())
    }

    fn read_range(
        &self,
        from: u64,
        max_bytes: u64,
        max_count: u64,
    ) -> Result<Vec<LogEntry>> {
        let inner = self.inner.read();
        let mut entries: Vec<LogEntry> = Vec::new();
        let mut bytes: u64 = 0;
        let mut expected = from;

        for (&index, entry) in inner.entries.range(from..) {
            if index != expected {
                break;
            }
            let entry_bytes = entry.payload.len() as u64;
            if !entries.is_empty()
                && (entries.len() as u64 >= max_count || bytes + entry_bytes > max_bytes)
            {
                break;
            }
            bytes += entry_bytes;
            entries.push(entry.clone());
            expected += 1;
        }
        Ok(entries)
    }

    fn truncate_from(
        &self,
        index: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.entries.split_off(&index);
        let (last_index, last_term) = inner
            .entries
            .last_key_value()
            .map(|(&i, e)| (i, e.term))
            .unwrap_or((0, 0));
        inner.last_index = last_index;
        inner.last_term = last_term;
        Ok(())
    }

    fn discard_up_to(
        &self,
        index: u64,
    ) -> Result<u64> {
        let mut inner = self.inner.write();
        let retained = inner.entries.split_off(&(index + 1));
        let discarded = inner.entries.len() as u64;
        inner.entries = retained;
        Ok(discarded)
    }

    fn first_index(&self) -> u64 {
        self.inner
            .read()
            .entries
            .first_key_value()
            .map(|(&i, _)| i)
            .unwrap_or(0)
    }

    fn last_index(&self) -> u64 {
        self.inner.read().last_index
    }

    fn last_term(&self) -> u64 {
        self.inner.read().last_term
    }

    fn entry_count(&self) -> u64 {
        self.inner.read().entries.len() as u64
    }
}
