//! Logical RPC and log types exchanged between cluster members.
//!
//! These are plain data structures: putting them on the wire (JSON, protobuf,
//! anything else) is the transport collaborator's concern. The serde derives
//! exist so a transport can pick its own encoding and so the `Version` header
//! of snapshot files can be persisted with bincode.

use serde::Deserialize;
use serde::Serialize;

pub type NodeId = u32;

/// A commit/snapshot watermark.
///
/// Ordered lexicographically by `(index, term)`; snapshot staleness checks
/// rely on this ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub index: u64,
    pub term: u64,
}

impl Version {
    pub fn new(
        index: u64,
        term: u64,
    ) -> Self {
        Self { index, term }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    #[default]
    Normal,
    /// Internal marker entry; replicated and acknowledged but never handed to
    /// the state machine.
    Noop,
}

/// One replicated log entry. Immutable once durably written; removable only
/// through truncation (conflict resolution) or compaction (post-snapshot
/// discard).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub kind: EntryKind,
    pub payload: Vec<u8>,
}

/// Identity of one snapshot transfer. A chunk carrying a different
/// `SnapshotInfo` than the receive file currently open invalidates the
/// partial transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub last_included: Version,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate_id: NodeId,
    pub term: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
    pub req_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub req_id: u64,
    pub term: u64,
    pub vote_granted: bool,
    /// Whether the candidate's log was at least as up-to-date as ours,
    /// independent of the term/vote checks.
    pub log_ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub leader_id: NodeId,
    pub term: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub leader_commit: u64,
    pub entries: Vec<LogEntry>,
    pub req_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub req_id: u64,
    pub term: u64,
    pub success: bool,
    /// On rejection, the leader's back-off hint: retry with a
    /// `prev_log_index` at or below this value.
    pub last_log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub leader_id: NodeId,
    pub term: u64,
    pub snapshot: SnapshotInfo,
    pub offset: u64,
    pub data: Vec<u8>,
    pub done: bool,
    pub req_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub req_id: u64,
    pub term: u64,
    /// Bytes durably present in the receive file after this chunk; the sender
    /// resumes from here on an offset mismatch.
    pub bytes_stored: u64,
}
