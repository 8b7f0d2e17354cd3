//! The transport-side handle the core holds for each other cluster member.
//!
//! The transport owns connections, marshaling, retries and backoff; the core
//! only pokes it ("go run an election round", "go replicate") and maintains
//! the leader-side replication cursors through it.

#[cfg(test)]
use mockall::automock;

/// Leader-side view of one remote cluster member.
///
/// `next_index`/`match_index` are the Raft replication cursors: the next log
/// index to send to the peer, and the highest index known to be durably
/// replicated on it. Both are reset when this node becomes leader.
#[cfg_attr(test, automock)]
pub trait Peer: Send + Sync + 'static {
    /// Ask the transport to send this peer a vote request for the current
    /// election round.
    fn notify_election(&self);

    /// Ask the transport to send this peer an AppendEntries round (entries or
    /// heartbeat, depending on its cursor).
    fn notify_replicate(&self);

    fn next_index(&self) -> u64;

    fn set_next_index(
        &self,
        index: u64,
    );

    fn match_index(&self) -> u64;

    fn set_match_index(
        &self,
        index: u64,
    );
}
