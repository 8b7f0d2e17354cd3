//! The consensus node: role state machine, term/vote bookkeeping, RPC
//! handlers, quorum commitment and the client write path.
//!
//! The node's mutable state is partitioned by lock scope: role/term/vote and
//! the log watermarks live behind one metadata mutex, the peer table is a
//! `DashMap`, and the vote tally, replicate-waiter table, compaction flag and
//! snapshot receive handle each sit behind their own guard. Cross-cutting
//! paths acquire metadata before waiters before peers.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use autometrics::autometrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio::time::Duration;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::is_majority;
use super::majority_index;
use super::ApplyWorker;
use super::CompactionWorker;
use super::ElectionTimer;
use super::ReplicateStatus;
use super::SnapshotReceiver;
use super::WaiterTable;
use crate::storage::latest_snapshot;
use crate::storage::read_version_from;
use crate::storage::snapshot_file_name;
use crate::AppendEntriesRequest;
use crate::AppendEntriesResponse;
use crate::EntryKind;
use crate::Error;
use crate::InstallSnapshotRequest;
use crate::InstallSnapshotResponse;
use crate::LogEntry;
use crate::LogStore;
use crate::NodeId;
use crate::Peer;
use crate::RaftConfig;
use crate::ReplicationError;
use crate::Result;
use crate::StateMachine;
use crate::StorageError;
use crate::Version;
use crate::VoteRequest;
use crate::VoteResponse;
use crate::API_SLO;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Role/term/vote metadata plus the log watermarks, all guarded by one mutex.
///
/// Invariant: `applied_index <= committed_index <= last_log_index`;
/// `current_term` and `committed_index` only ever increase.
pub(crate) struct NodeMeta {
    pub(crate) role: Role,
    pub(crate) current_term: u64,
    pub(crate) vote_for: Option<NodeId>,
    pub(crate) leader_id: Option<NodeId>,
    pub(crate) last_log_index: u64,
    pub(crate) committed_index: u64,
    pub(crate) applied_index: u64,
    pub(crate) last_snapshot_index: u64,
    pub(crate) last_snapshot_term: u64,
}

pub struct Node {
    self_ref: Weak<Node>,

    pub(crate) node_id: NodeId,
    pub(crate) config: Arc<RaftConfig>,
    pub(crate) log_store: Arc<dyn LogStore>,
    pub(crate) state_machine: Arc<dyn StateMachine>,
    pub(crate) peers: DashMap<NodeId, Arc<dyn Peer>>,

    pub(crate) meta: Mutex<NodeMeta>,
    vote_responses: Mutex<std::collections::HashMap<NodeId, VoteResponse>>,
    pub(crate) waiters: WaiterTable,
    pub(crate) compacting_log: Mutex<bool>,
    snapshot_receiver: Mutex<Option<SnapshotReceiver>>,

    pub(crate) election_timer: ElectionTimer,
    pub(crate) apply_notify: Notify,

    shutdown_tx: watch::Sender<()>,
    shutdown_rx: watch::Receiver<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) compaction_handle: Mutex<Option<JoinHandle<()>>>,

    req_id: AtomicU64,
}

/// Wires a [`Node`] together from its collaborators.
pub struct NodeBuilder {
    node_id: NodeId,
    config: RaftConfig,
    log_store: Option<Arc<dyn LogStore>>,
    state_machine: Option<Arc<dyn StateMachine>>,
    peers: Vec<(NodeId, Arc<dyn Peer>)>,
}

impl NodeBuilder {
    pub fn new(
        node_id: NodeId,
        config: RaftConfig,
    ) -> Self {
        Self {
            node_id,
            config,
            log_store: None,
            state_machine: None,
            peers: Vec::new(),
        }
    }

    pub fn log_store(
        mut self,
        log_store: Arc<dyn LogStore>,
    ) -> Self {
        self.log_store = Some(log_store);
        self
    }

    pub fn state_machine(
        mut self,
        state_machine: Arc<dyn StateMachine>,
    ) -> Self {
        self.state_machine = Some(state_machine);
        self
    }

    pub fn add_peer(
        mut self,
        peer_id: NodeId,
        peer: Arc<dyn Peer>,
    ) -> Self {
        self.peers.push((peer_id, peer));
        self
    }

    /// Validates the configuration, prepares the snapshot directory and
    /// recovers the node's watermarks from the collaborators.
    pub fn build(self) -> Result<Arc<Node>> {
        self.config.validate()?;

        let log_store = self
            .log_store
            .ok_or_else(|| Error::Fatal("NodeBuilder requires a log store".to_string()))?;
        let state_machine = self
            .state_machine
            .ok_or_else(|| Error::Fatal("NodeBuilder requires a state machine".to_string()))?;

        let snapshot_dir = self.config.snapshot.snapshot_dir.clone();
        std::fs::create_dir_all(&snapshot_dir).map_err(|e| StorageError::PathError {
            path: snapshot_dir.clone(),
            source: e,
        })?;

        let peers = DashMap::new();
        for (peer_id, peer) in self.peers {
            peers.insert(peer_id, peer);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let election_timer = ElectionTimer::new(
            (
                self.config.election.election_timeout_min,
                self.config.election.election_timeout_max,
            ),
            self.config.election.timer_seed,
        );

        let node = Arc::new_cyclic(|self_ref| Node {
            self_ref: self_ref.clone(),
            node_id: self.node_id,
            config: Arc::new(self.config),
            log_store,
            state_machine,
            peers,
            meta: Mutex::new(NodeMeta {
                role: Role::Follower,
                current_term: 0,
                vote_for: None,
                leader_id: None,
                last_log_index: 0,
                committed_index: 0,
                applied_index: 0,
                last_snapshot_index: 0,
                last_snapshot_term: 0,
            }),
            vote_responses: Mutex::new(std::collections::HashMap::new()),
            waiters: WaiterTable::new(),
            compacting_log: Mutex::new(false),
            snapshot_receiver: Mutex::new(None),
            election_timer,
            apply_notify: Notify::new(),
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
            compaction_handle: Mutex::new(None),
            req_id: AtomicU64::new(1),
        });
        node.recover()?;
        Ok(node)
    }
}

impl Node {
    fn self_arc(&self) -> Option<Arc<Node>> {
        self.self_ref.upgrade()
    }

    /// Recovers the snapshot watermark from the newest committed snapshot and
    /// re-derives the log watermarks from the store.
    fn recover(&self) -> Result<()> {
        let snapshot = latest_snapshot(&self.config.snapshot.snapshot_dir)?;
        let mut meta = self.meta.lock();
        if let Some((version, path)) = snapshot {
            info!("recovered snapshot watermark {:?} from {:?}", version, path);
            meta.last_snapshot_index = version.index;
            meta.last_snapshot_term = version.term;
            // The state machine restores itself from the snapshot; nothing at
            // or below the watermark can be re-applied.
            meta.committed_index = version.index;
            meta.applied_index = version.index;
        }
        meta.last_log_index = self.log_store.last_index().max(meta.last_snapshot_index);
        Ok(())
    }

    /// Spawns the election-timer loop and the apply worker. Call once.
    pub fn start(&self) {
        let Some(node) = self.self_arc() else {
            return;
        };
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            warn!("node {} already started", self.node_id);
            return;
        }
        self.election_timer.rearm();

        let apply_worker = ApplyWorker::new(node.clone(), self.shutdown_rx.clone());
        handles.push(tokio::spawn(apply_worker.run()));
        handles.push(tokio::spawn(Self::election_loop(
            node,
            self.shutdown_rx.clone(),
        )));
        info!("node {} started", self.node_id);
    }

    async fn election_loop(
        node: Arc<Node>,
        mut shutdown_signal: watch::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_signal.changed() => {
                    warn!("[ElectionLoop] shutdown signal received.");
                    return;
                }
                _ = node.election_timer.expired() => {
                    node.election_timer_callback();
                }
            }
        }
    }

    /// Signals every background task to stop and joins them; pending client
    /// writes are resolved with a no-leader status.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("background task failed during shutdown: {:?}", e);
            }
        }
        let compaction = self.compaction_handle.lock().take();
        if let Some(handle) = compaction {
            if let Err(e) = handle.await {
                error!("compaction task failed during shutdown: {:?}", e);
            }
        }
        self.waiters.resolve_all(ReplicateStatus::NoLeader);
        info!("node {} shut down", self.node_id);
    }

    // ---------------------------------------------------------------------
    // Metadata accessors

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn role(&self) -> Role {
        self.meta.lock().role
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    pub fn is_candidate(&self) -> bool {
        self.role() == Role::Candidate
    }

    pub fn current_term(&self) -> u64 {
        self.meta.lock().current_term
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.meta.lock().leader_id
    }

    pub fn vote_for(&self) -> Option<NodeId> {
        self.meta.lock().vote_for
    }

    pub fn last_log_index(&self) -> u64 {
        self.meta.lock().last_log_index
    }

    pub fn committed_index(&self) -> u64 {
        self.meta.lock().committed_index
    }

    pub fn applied_index(&self) -> u64 {
        self.meta.lock().applied_index
    }

    pub fn last_snapshot_version(&self) -> Version {
        let meta = self.meta.lock();
        Version::new(meta.last_snapshot_index, meta.last_snapshot_term)
    }

    pub(crate) fn set_role(
        &self,
        role: Role,
    ) {
        self.meta.lock().role = role;
    }

    /// Adopting a higher term clears the per-term vote; terms never move
    /// backwards.
    pub(crate) fn set_current_term(
        &self,
        term: u64,
    ) {
        let mut meta = self.meta.lock();
        if term > meta.current_term {
            meta.vote_for = None;
            meta.current_term = term;
        }
    }

    pub(crate) fn set_vote_for(
        &self,
        vote_for: Option<NodeId>,
    ) {
        self.meta.lock().vote_for = vote_for;
    }

    pub(crate) fn set_leader_id(
        &self,
        leader_id: Option<NodeId>,
    ) {
        let mut meta = self.meta.lock();
        if leader_id.is_some() && meta.leader_id != leader_id {
            info!("find new leader: {:?}", leader_id);
        }
        meta.leader_id = leader_id;
    }

    /// Commit index is monotone; concurrent updaters may race with a bigger
    /// value.
    pub(crate) fn set_committed_index(
        &self,
        index: u64,
    ) {
        let mut meta = self.meta.lock();
        if meta.committed_index < index {
            meta.committed_index = index;
        }
    }

    pub(crate) fn set_applied_index(
        &self,
        index: u64,
    ) {
        let mut meta = self.meta.lock();
        if meta.applied_index < index {
            meta.applied_index = index;
        }
    }

    fn next_req_id(&self) -> u64 {
        self.req_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Term of the newest local entry, falling back to the snapshot term when
    /// the log has been fully compacted.
    fn local_last_log_term(&self) -> u64 {
        let term = self.log_store.last_term();
        if term == 0 {
            self.meta.lock().last_snapshot_term
        } else {
            term
        }
    }

    fn peer_count(&self) -> usize {
        self.peers.len()
    }

    // ---------------------------------------------------------------------
    // Role transitions

    /// Forced transition to Follower upon observing higher authority.
    ///
    /// Stepping down from Leader abandons the in-flight client writes (their
    /// commitment can no longer be guaranteed); from Candidate it drops the
    /// accumulated vote tally. Every step-down rearms the election timer.
    pub(crate) fn step_down(&self) {
        let prev_role = {
            let mut meta = self.meta.lock();
            let prev_role = meta.role;
            meta.role = Role::Follower;
            prev_role
        };
        match prev_role {
            Role::Leader => {
                info!("node {} steps down from leader", self.node_id);
                self.waiters.resolve_all(ReplicateStatus::NoLeader);
            }
            Role::Candidate => self.clear_vote_responses(),
            Role::Follower => {}
        }
        self.election_timer.rearm();
    }

    fn become_leader(&self) {
        info!(
            "node {} becomes leader for term {}",
            self.node_id,
            self.current_term()
        );
        self.election_timer.cancel();
        {
            let mut meta = self.meta.lock();
            meta.role = Role::Leader;
            meta.leader_id = Some(self.node_id);
        }
        self.clear_vote_responses();

        // Reinitialized after election: nextIndex = leader last log index + 1,
        // matchIndex = 0.
        let next_index = self.last_log_index() + 1;
        for peer in self.peers.iter() {
            peer.value().set_next_index(next_index);
            peer.value().set_match_index(0);
        }
        // Initial heartbeat establishes authority immediately.
        self.notify_peers_replicate();
    }

    /// Election timeout fired: the node lost contact with a leader.
    ///
    /// A follower that already granted its vote this term keeps waiting for
    /// that election to settle and merely rearms; anyone else starts a new
    /// election round.
    pub(crate) fn election_timer_callback(&self) {
        self.set_leader_id(None);

        if self.role() == Role::Follower && self.vote_for().is_some() {
            self.election_timer.rearm();
            return;
        }

        self.clear_vote_responses();
        self.set_role(Role::Candidate);
        let new_term = self.current_term() + 1;
        debug!("node {} starts election for term {}", self.node_id, new_term);
        self.set_current_term(new_term);
        self.set_vote_for(Some(self.node_id));
        self.notify_peers_election();
        self.election_timer.rearm();
    }

    /// Adopts a higher term observed out-of-band (e.g. in a peer response)
    /// and steps down. No-op for stale or current terms.
    pub fn handle_new_term(
        &self,
        term: u64,
    ) {
        if term <= self.current_term() {
            return;
        }
        info!("receive new term {}", term);
        self.set_current_term(term);
        self.step_down();
    }

    // ---------------------------------------------------------------------
    // Peer fan-out

    fn notify_peers_election(&self) {
        for peer in self.peers.iter() {
            peer.value().notify_election();
        }
    }

    pub(crate) fn notify_peers_replicate(&self) {
        for peer in self.peers.iter() {
            peer.value().notify_replicate();
        }
    }

    fn clear_vote_responses(&self) {
        self.vote_responses.lock().clear();
    }

    // ---------------------------------------------------------------------
    // Client write path

    /// Replicates `data` to the cluster and waits until it commits.
    ///
    /// Returns the committed entry's `(index, term)`. Fails immediately when
    /// this node is not the leader or the local append fails; fails later
    /// with [`ReplicationError::NotLeader`] when leadership is lost before
    /// commitment. `replication.replicate_timeout_ms` (when nonzero) bounds
    /// the wait.
    #[autometrics(objective = API_SLO)]
    pub async fn replicate(
        &self,
        data: Vec<u8>,
    ) -> Result<Version> {
        if !self.is_leader() {
            return Err(ReplicationError::NotLeader {
                leader_id: self.leader_id(),
            }
            .into());
        }

        let (index, term) = self.write_log(data)?;
        let waiter = self.waiters.register(index);
        self.notify_peers_replicate();

        // The commit may already have raced past us (heartbeat acks between
        // append and registration); don't wait for a commit that happened.
        if self.committed_index() >= index {
            self.waiters.resolve_up_to(index, ReplicateStatus::Committed);
        }

        let timeout_ms = self.config.replication.replicate_timeout_ms;
        let status = if timeout_ms == 0 {
            waiter
                .await
                .map_err(|_| ReplicationError::Unknown("replicate waiter dropped".to_string()))?
        } else {
            match timeout(Duration::from_millis(timeout_ms), waiter).await {
                Ok(Ok(status)) => status,
                Ok(Err(_)) => {
                    return Err(
                        ReplicationError::Unknown("replicate waiter dropped".to_string()).into(),
                    )
                }
                Err(_) => {
                    return Err(ReplicationError::Timeout {
                        duration_ms: timeout_ms,
                    }
                    .into())
                }
            }
        };

        match status {
            ReplicateStatus::Committed => Ok(Version::new(index, term)),
            ReplicateStatus::NoLeader => Err(ReplicationError::NotLeader {
                leader_id: self.leader_id(),
            }
            .into()),
        }
    }

    /// Appends one client entry to the local log, allocating the next index
    /// under the metadata lock.
    fn write_log(
        &self,
        data: Vec<u8>,
    ) -> Result<(u64, u64)> {
        let entry = {
            let mut meta = self.meta.lock();
            meta.last_log_index += 1;
            LogEntry {
                index: meta.last_log_index,
                term: meta.current_term,
                kind: EntryKind::Normal,
                payload: data,
            }
        };
        let (index, term) = (entry.index, entry.term);

        if let Err(e) = self.log_store.append(entry) {
            error!("local log append failed: {:?}", e);
            // Resync the allocated index with what the store actually holds.
            let mut meta = self.meta.lock();
            meta.last_log_index = self.log_store.last_index().max(meta.last_snapshot_index);
            return Err(ReplicationError::WriteLog(format!("{e:?}")).into());
        }

        if self.should_compact_log() {
            self.async_compact_log();
        }
        Ok((index, term))
    }

    // ---------------------------------------------------------------------
    // RequestVote

    /// RequestVote RPC handler (Raft §5.2/§5.4 safety rules). Always returns
    /// a well-formed response carrying the possibly-updated current term.
    #[autometrics(objective = API_SLO)]
    pub fn handle_vote_request(
        &self,
        req: &VoteRequest,
    ) -> VoteResponse {
        let mut resp = VoteResponse {
            req_id: req.req_id,
            term: self.current_term(),
            vote_granted: false,
            log_ok: false,
        };

        // Reply false if term < currentTerm (§5.1)
        if req.term < resp.term {
            debug!(
                "deny vote for {}: stale term {} < {}",
                req.candidate_id, req.term, resp.term
            );
            return resp;
        }

        // Is the candidate's log at least as up-to-date as ours?
        let last_log_index = self.last_log_index();
        if req.last_log_index > last_log_index {
            resp.log_ok = true;
        } else if req.last_log_index == last_log_index
            && req.last_log_term == self.local_last_log_term()
        {
            resp.log_ok = true;
        }

        if req.term > self.current_term() {
            // Discovered a node with a higher term: step down first, then
            // decide the vote in the new term.
            self.step_down();
            self.set_current_term(req.term);
        }

        if req.term == self.current_term() && resp.log_ok && self.vote_for().is_none() {
            // One vote per term, recorded before answering.
            self.set_vote_for(Some(req.candidate_id));
            resp.vote_granted = true;
            debug!(
                "grant vote to {} for term {}",
                req.candidate_id,
                self.current_term()
            );
        }

        resp.term = self.current_term();
        resp
    }

    /// Tallies one vote response. Idempotent per peer: a newer response
    /// replaces the peer's earlier one.
    pub fn vote_response_callback(
        &self,
        peer_id: NodeId,
        resp: &VoteResponse,
    ) {
        if resp.term < self.current_term() {
            debug!("handle vote response, but term is old");
            return;
        }
        if resp.term > self.current_term() {
            self.handle_new_term(resp.term);
            return;
        }
        if !self.is_candidate() {
            debug!("handle vote response, but not candidate");
            return;
        }

        let votes = {
            let mut responses = self.vote_responses.lock();
            responses.insert(peer_id, resp.clone());
            // myself included
            1 + responses.values().filter(|r| r.vote_granted).count()
        };

        let nodes = self.peer_count() + 1;
        if is_majority(votes, nodes) {
            self.become_leader();
        }
    }

    /// Builds the vote request for the current election round.
    pub fn build_vote_request(&self) -> VoteRequest {
        VoteRequest {
            candidate_id: self.node_id,
            term: self.current_term(),
            last_log_index: self.last_log_index(),
            last_log_term: self.local_last_log_term(),
            req_id: self.next_req_id(),
        }
    }

    // ---------------------------------------------------------------------
    // AppendEntries

    /// AppendEntries RPC handler: consistency check, conflict truncation,
    /// append, and follower-side commit advancement. Always returns a
    /// well-formed response; storage failures answer "no progress" so the
    /// leader retries.
    #[autometrics(objective = API_SLO)]
    pub fn handle_append_entries(
        &self,
        req: &AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        let mut resp = AppendEntriesResponse {
            req_id: req.req_id,
            term: self.current_term(),
            success: false,
            last_log_index: self.last_log_index(),
        };

        // Reply false if term < currentTerm (§5.1)
        if req.term < resp.term {
            debug!(
                "reject append from {}: stale term {} < {}",
                req.leader_id, req.term, resp.term
            );
            return resp;
        }

        // A current leader exists: adopt its term and follow it.
        self.set_current_term(req.term);
        self.step_down();
        self.set_leader_id(Some(req.leader_id));
        resp.term = self.current_term();

        if !self.check_prev_log(req, &mut resp) {
            return resp;
        }

        resp.success = true;

        // Append entries not already present; on the first conflicting index
        // truncate the suffix (§5.3) and stop probing for duplicates.
        let mut sync_log = true;
        for entry in &req.entries {
            if sync_log && entry.index <= self.last_log_index() {
                match self.log_store.entry(entry.index) {
                    Ok(Some(existing)) if existing.term == entry.term => continue,
                    Ok(Some(_)) => {
                        if let Err(e) = self.log_store.truncate_from(entry.index) {
                            error!("truncate log from {} failed: {:?}", entry.index, e);
                            return self.no_progress(resp);
                        }
                        self.meta.lock().last_log_index = entry.index - 1;
                        sync_log = false;
                    }
                    Ok(None) => {
                        sync_log = false;
                    }
                    Err(e) => {
                        error!("read log {} failed: {:?}", entry.index, e);
                        return self.no_progress(resp);
                    }
                }
            }
            if let Err(e) = self.log_store.append(entry.clone()) {
                error!("append log {} from leader failed: {:?}", entry.index, e);
                return self.no_progress(resp);
            }
            let mut meta = self.meta.lock();
            if entry.index > meta.last_log_index {
                meta.last_log_index = entry.index;
            }
        }
        resp.last_log_index = self.last_log_index();

        // If leaderCommit > commitIndex:
        // commitIndex = min(leaderCommit, index of last new entry)
        if req.leader_commit > self.committed_index() {
            let new_commit = req.leader_commit.min(self.last_log_index());
            self.set_committed_index(new_commit);
            self.apply_notify.notify_one();
        }

        resp
    }

    /// The §5.3 consistency check on `(prev_log_index, prev_log_term)`.
    /// Returns whether the request may proceed; on rejection the response
    /// carries the leader's back-off hint.
    fn check_prev_log(
        &self,
        req: &AppendEntriesRequest,
        resp: &mut AppendEntriesResponse,
    ) -> bool {
        let last_log_index = self.last_log_index();
        let (last_snapshot_index, last_snapshot_term) = {
            let meta = self.meta.lock();
            (meta.last_snapshot_index, meta.last_snapshot_term)
        };

        // The empty prefix is trivially consistent.
        if req.prev_log_index == 0 {
            return true;
        }

        if req.prev_log_index > last_log_index {
            // Our log is behind the leader's probe point.
            resp.last_log_index = last_log_index;
            return false;
        }

        if req.prev_log_index == last_snapshot_index {
            if req.prev_log_term != last_snapshot_term {
                // The leader disagrees with our snapshot watermark. That is
                // not a retryable divergence.
                error!(
                    "cluster inconsistency: prev term {} contradicts snapshot term {} at index {}",
                    req.prev_log_term, last_snapshot_term, last_snapshot_index
                );
                return false;
            }
            return true;
        }

        if req.prev_log_index == last_log_index {
            if req.prev_log_term != self.log_store.last_term() {
                resp.last_log_index = req.prev_log_index - 1;
                return false;
            }
            return true;
        }

        let first_index = self.log_store.first_index();
        if first_index > 0 && req.prev_log_index >= first_index {
            match self.log_store.entry(req.prev_log_index) {
                Ok(Some(entry)) => {
                    if req.prev_log_term != entry.term {
                        resp.last_log_index = req.prev_log_index - 1;
                        return false;
                    }
                    true
                }
                Ok(None) | Err(_) => {
                    error!(
                        "read log {} failed during consistency check",
                        req.prev_log_index
                    );
                    false
                }
            }
        } else {
            // The probe point was compacted away: the leader must fall back
            // to snapshot installation.
            resp.last_log_index = last_snapshot_index;
            false
        }
    }

    fn no_progress(
        &self,
        mut resp: AppendEntriesResponse,
    ) -> AppendEntriesResponse {
        resp.success = false;
        resp.last_log_index = self.last_log_index();
        resp
    }

    /// Recomputes the quorum commit index from the peers' match indexes.
    ///
    /// This is the one place commit progress is decided on the leader; the
    /// transport calls it after every peer match-index update. Advancing the
    /// commit index resolves the parked client writes up to it (ascending)
    /// and wakes the apply worker.
    pub fn replicate_log_callback(&self) {
        if !self.is_leader() {
            debug!("replicate_log_callback: not leader");
            return;
        }

        let mut match_indexes: Vec<u64> =
            self.peers.iter().map(|p| p.value().match_index()).collect();
        match_indexes.push(self.last_log_index()); // myself

        let majority = majority_index(match_indexes);
        if majority > self.committed_index() {
            debug!("commit index advances to {}", majority);
            self.set_committed_index(majority);
            self.waiters
                .resolve_up_to(majority, ReplicateStatus::Committed);
            self.apply_notify.notify_one();
        }
    }

    /// Builds the AppendEntries request for a peer whose cursor is at
    /// `next_index`. An empty entry batch is a heartbeat.
    ///
    /// Fails with [`ReplicationError::LogCompacted`] when the probe point has
    /// been compacted away, the cue to switch to snapshot installation.
    pub fn build_replicate_log_request(
        &self,
        next_index: u64,
    ) -> Result<AppendEntriesRequest> {
        let (term, leader_commit, last_log_index) = {
            let meta = self.meta.lock();
            (meta.current_term, meta.committed_index, meta.last_log_index)
        };
        let mut req = AppendEntriesRequest {
            leader_id: self.node_id,
            term,
            prev_log_index: 0,
            prev_log_term: 0,
            leader_commit,
            entries: Vec::new(),
            req_id: self.next_req_id(),
        };

        if last_log_index == 0 {
            return Ok(req);
        }

        let prev = next_index.saturating_sub(1);
        req.prev_log_index = prev;
        req.prev_log_term = self.prev_log_term(prev)?;

        if next_index <= last_log_index {
            let replication = &self.config.replication;
            req.entries = self.log_store.read_range(
                next_index,
                replication.max_bytes_per_replication,
                replication.max_entries_per_replication,
            )?;
        }
        Ok(req)
    }

    fn prev_log_term(
        &self,
        prev: u64,
    ) -> Result<u64> {
        if prev == 0 {
            return Ok(0);
        }
        {
            let meta = self.meta.lock();
            if prev == meta.last_snapshot_index {
                return Ok(meta.last_snapshot_term);
            }
        }
        match self.log_store.entry(prev)? {
            Some(entry) => Ok(entry.term),
            None => Err(ReplicationError::LogCompacted {
                first_index: self.log_store.first_index(),
            }
            .into()),
        }
    }

    // ---------------------------------------------------------------------
    // InstallSnapshot

    /// InstallSnapshot RPC handler: chunked receive into a single in-progress
    /// temp file, finalized into a committed snapshot when the sender marks
    /// the transfer done.
    #[autometrics(objective = API_SLO)]
    pub fn handle_install_snapshot(
        &self,
        req: &InstallSnapshotRequest,
    ) -> InstallSnapshotResponse {
        let mut resp = InstallSnapshotResponse {
            req_id: req.req_id,
            term: self.current_term(),
            bytes_stored: 0,
        };

        if req.term < resp.term {
            debug!(
                "reject snapshot from {}: stale term {} < {}",
                req.leader_id, req.term, resp.term
            );
            return resp;
        }

        self.set_current_term(req.term);
        self.step_down();
        self.set_leader_id(Some(req.leader_id));
        resp.term = self.current_term();

        let mut receiver = self.snapshot_receiver.lock();

        // A different transfer identity invalidates the partial file.
        let reopen = match receiver.as_ref() {
            Some(current) => current.info() != &req.snapshot,
            None => true,
        };
        if reopen {
            if let Some(stale) = receiver.take() {
                warn!(
                    "discard stale partial snapshot transfer {:?}",
                    stale.info()
                );
                stale.discard();
            }
            match SnapshotReceiver::open(&self.config.snapshot.snapshot_dir, req.snapshot) {
                Ok(opened) => *receiver = Some(opened),
                Err(e) => {
                    error!("open snapshot receive file failed: {:?}", e);
                    return resp;
                }
            }
        }

        let Some(current) = receiver.as_mut() else {
            return resp;
        };
        let size = match current.size() {
            Ok(size) => size,
            Err(e) => {
                error!("snapshot receive file size failed: {:?}", e);
                return resp;
            }
        };
        if size != req.offset {
            // Out-of-order or duplicate chunk; tell the sender where to
            // resume from.
            debug!("snapshot chunk offset {} != stored {}", req.offset, size);
            resp.bytes_stored = size;
            return resp;
        }

        match current.append(&req.data) {
            Ok(new_size) => resp.bytes_stored = new_size,
            Err(e) => {
                error!("snapshot chunk write failed: {:?}", e);
                resp.bytes_stored = current.size().unwrap_or(0);
                return resp;
            }
        }

        if req.done {
            if let Some(done) = receiver.take() {
                if let Err(e) = self.install_snapshot_file(done) {
                    error!("snapshot install failed: {:?}", e);
                }
            }
        }
        resp
    }

    /// Finalizes a completed snapshot transfer: staleness check against any
    /// existing snapshot, consistency check against the local log, rename
    /// into place, prefix discard, watermark update and state-machine reload.
    fn install_snapshot_file(
        &self,
        receiver: SnapshotReceiver,
    ) -> Result<()> {
        let path = receiver.into_path();
        let version = match read_version_from(&path) {
            Ok(version) => version,
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        };

        let snapshot_dir = &self.config.snapshot.snapshot_dir;
        if let Some((existing, _)) = latest_snapshot(snapshot_dir)? {
            if version <= existing {
                info!(
                    "received snapshot {:?} is stale (existing {:?})",
                    version, existing
                );
                let _ = std::fs::remove_file(&path);
                return Ok(());
            }
        }

        let last_log_index = self.last_log_index();
        if last_log_index >= version.index {
            // The snapshot claims to supersede entries we still hold beyond
            // its watermark. One of the two sides is corrupt.
            let _ = std::fs::remove_file(&path);
            return Err(Error::Fatal(format!(
                "snapshot watermark {}/{} does not cover local log (last index {})",
                version.index, version.term, last_log_index
            )));
        }

        let dest = snapshot_dir.join(snapshot_file_name(version.index));
        std::fs::rename(&path, &dest).map_err(|e| StorageError::PathError {
            path: dest.clone(),
            source: e,
        })?;

        let discarded = self.log_store.discard_up_to(version.index)?;
        info!(
            "discarded {} log entries covered by snapshot {:?}",
            discarded, version
        );

        {
            let mut meta = self.meta.lock();
            meta.last_snapshot_index = version.index;
            meta.last_snapshot_term = version.term;
            meta.last_log_index = meta.last_log_index.max(version.index);
            if meta.committed_index < version.index {
                meta.committed_index = version.index;
            }
            if meta.applied_index < version.index {
                meta.applied_index = version.index;
            }
        }

        self.state_machine.load_snapshot(&dest)?;
        info!("snapshot {:?} installed from {:?}", version, dest);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Compaction trigger

    fn should_compact_log(&self) -> bool {
        if self.log_store.entry_count() <= self.config.compaction.max_log_count {
            return false;
        }
        !self.check_compacting_log()
    }

    pub(crate) fn check_compacting_log(&self) -> bool {
        *self.compacting_log.lock()
    }

    /// Starts a background compaction run unless one is already in flight.
    pub(crate) fn async_compact_log(&self) {
        let Some(node) = self.self_arc() else {
            return;
        };
        // check again under the flag lock
        {
            let mut compacting = self.compacting_log.lock();
            if *compacting {
                return;
            }
            *compacting = true;
        }
        let worker = CompactionWorker::new(node);
        let handle = tokio::spawn(worker.run());
        // A previous handle left here has already finished (the flag was
        // clear); dropping it just detaches the completed task.
        self.compaction_handle.lock().replace(handle);
    }
}
