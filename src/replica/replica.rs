use crate::actor::ActorClient;
use crate::api::TabletDataLayer;
use crate::ids::{PeerId, TabletId};
use crate::quorum::{MembershipError, QuorumConfig, QuorumTracker};
use crate::replica::election::{CurrentLeader, ElectionConfig, ElectionState, LeaderStateTracker};
use crate::replica::local_state::{PersistenceError, PersistentVoteState};
use crate::replica::replica_api::{
    ChangeConfigError, ConfigChange, ConsensusStatus, GcLogError, LeaderTimerTick,
    StartElectionError, StartReplicationError, StartReplicationInput, StartReplicationOutput,
    StepDownError, UpdateReplyDescriptor, UpdateReplyFromPeer, UpdateReplyResult,
    VoteReplyFromPeer, VoteResult,
};
use crate::replica::tablet_log::TabletLog;
use crate::transport::{
    PeerTransport, UpdateRequest, UpdateResponse, UpdateStatus, VoteRequest, VoteResponse,
};
use crate::wal::{Log, OpId, ReplicatedOperation, Term};
use slog::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Duration;

pub(crate) struct ReplicaConfig<L, S, M> {
    pub(crate) logger: slog::Logger,
    pub(crate) tablet_id: TabletId,
    pub(crate) my_peer_id: PeerId,
    pub(crate) committed_config: QuorumConfig,
    pub(crate) log: L,
    pub(crate) vote_state: S,
    pub(crate) data_layer: M,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) actor_client: ActorClient,
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
    pub(crate) rpc_timeout: Duration,
    pub(crate) max_entries_per_request: usize,
}

/// The consensus state machine for one tablet replica. All handlers run on
/// the single-threaded event loop, so none of them are async and the struct
/// needs no internal locking; long-running work (peer RPCs) is spawned onto
/// separate tasks that post their results back as events.
pub(crate) struct Replica<L: Log, S: PersistentVoteState, M: TabletDataLayer> {
    logger: slog::Logger,
    tablet_id: TabletId,
    my_peer_id: PeerId,
    quorum: QuorumTracker,
    tablet_log: TabletLog<L, M>,
    vote_state: S,
    election_state: ElectionState,
    transport: Arc<dyn PeerTransport>,
    actor_client: ActorClient,
    rpc_timeout: Duration,
    max_entries_per_request: usize,

    /// Set when a safety-critical failure (persistence, committed-entry
    /// truncation) is detected. A halted replica answers every request
    /// negatively but never participates again.
    fatal: Option<String>,
}

impl<L: Log, S: PersistentVoteState, M: TabletDataLayer> Replica<L, S, M> {
    pub(crate) fn new(config: ReplicaConfig<L, S, M>) -> Self {
        let election_state = ElectionState::new_follower(
            ElectionConfig {
                my_peer_id: config.my_peer_id.clone(),
                leader_heartbeat_duration: config.leader_heartbeat_duration,
                follower_min_timeout: config.follower_min_timeout,
                follower_max_timeout: config.follower_max_timeout,
            },
            config.actor_client.clone(),
        );
        let tablet_log = TabletLog::new(config.logger.clone(), config.log, config.data_layer);

        Replica {
            logger: config.logger,
            tablet_id: config.tablet_id,
            my_peer_id: config.my_peer_id,
            quorum: QuorumTracker::new(config.committed_config),
            tablet_log,
            vote_state: config.vote_state,
            election_state,
            transport: config.transport,
            actor_client: config.actor_client,
            rpc_timeout: config.rpc_timeout,
            max_entries_per_request: config.max_entries_per_request,
            fatal: None,
        }
    }

    // ------------------------------------------------------------------
    // Client-facing handlers
    // ------------------------------------------------------------------

    pub(crate) fn handle_start_replication(
        &mut self,
        input: StartReplicationInput,
    ) -> Result<StartReplicationOutput, StartReplicationError> {
        if self.fatal.is_some() {
            return Err(StartReplicationError::ReplicaFailed);
        }
        if !self.election_state.is_leader() {
            return Err(StartReplicationError::NotLeader {
                leader_hint: self.leader_hint(),
            });
        }

        let term = self.vote_state.current_term();
        let op_id = self.tablet_log.append_as_leader(
            term,
            ReplicatedOperation::Write {
                payload: input.data.to_vec(),
            },
        )?;

        // A single-voter quorum commits on local durability alone.
        self.leader_advance_commit_index();
        for peer_id in self.replication_peer_ids() {
            self.replicate_to_peer(&peer_id);
        }

        Ok(StartReplicationOutput { op_id })
    }

    pub(crate) fn handle_change_config(
        &mut self,
        change: ConfigChange,
    ) -> Result<(), ChangeConfigError> {
        if self.fatal.is_some() {
            return Err(ChangeConfigError::ReplicaFailed);
        }
        if !self.election_state.is_leader() {
            return Err(ChangeConfigError::NotLeader {
                leader_hint: self.leader_hint(),
            });
        }
        if self.quorum.has_pending() {
            return Err(ChangeConfigError::ConfigChangeInProgress);
        }

        let term = self.vote_state.current_term();
        // The new config is versioned by the index its log entry will land at.
        let opid_index = self.tablet_log.last_op_id().index + 1;
        let committed = self.quorum.committed_config();
        let new_config = match change {
            ConfigChange::AddServer {
                peer_id,
                member_type,
            } => committed
                .with_member_added(peer_id, member_type, opid_index)
                .map_err(membership_to_change_config_error)?,
            ConfigChange::RemoveServer { peer_id } => committed
                .with_member_removed(&peer_id, opid_index)
                .map_err(membership_to_change_config_error)?,
        };

        let op_id = self.tablet_log.append_as_leader(
            term,
            ReplicatedOperation::ConfigChange {
                new_config: new_config.clone(),
            },
        )?;
        info!(
            self.logger,
            "Appended config change at {:?}: {:?}", op_id, new_config
        );
        self.quorum.begin_change_if_none_pending(new_config);

        // A just-added member starts receiving the log before the change
        // commits; a removed member keeps receiving it until the removal
        // commits and drops it from the replication set.
        let peers = self.replication_peer_ids();
        let next_index = self.tablet_log.last_op_id().index + 1;
        self.election_state.sync_leader_peers(term, peers.clone(), next_index);
        self.leader_advance_commit_index();
        for peer_id in peers {
            self.replicate_to_peer(&peer_id);
        }

        Ok(())
    }

    pub(crate) fn handle_start_election(&mut self) -> Result<(), StartElectionError> {
        if self.fatal.is_some() {
            return Err(StartElectionError::ReplicaFailed);
        }
        if self.election_state.is_leader() {
            // Already leading; a forced election would only disrupt.
            return Ok(());
        }
        self.begin_election();
        Ok(())
    }

    pub(crate) fn handle_step_down(&mut self) -> Result<(), StepDownError> {
        if self.fatal.is_some() {
            return Err(StepDownError::ReplicaFailed);
        }
        if !self.election_state.is_leader() {
            return Err(StepDownError::NotLeader);
        }
        info!(self.logger, "Stepping down by request");
        // The term is not bumped; some other replica's election timeout will
        // produce the successor.
        self.election_state.transition_to_follower(None);
        Ok(())
    }

    /// Reclaims the applied log prefix. A leader additionally retains
    /// everything the slowest tracked peer still needs, so GC never strands a
    /// live peer behind the retained prefix.
    pub(crate) fn handle_gc_log(&mut self) -> Result<u64, GcLogError> {
        if self.fatal.is_some() {
            return Err(GcLogError::ReplicaFailed);
        }
        let mut up_to = self.tablet_log.last_applied();
        if let Some(tracker) = self.election_state.leader_state() {
            if let Some(min_match) = tracker.min_match_index() {
                up_to = up_to.min(min_match);
            }
        }
        let first_retained = self.tablet_log.gc_up_to(up_to)?;
        debug!(
            self.logger,
            "Log GC up to index {}; first retained index is now {}", up_to, first_retained
        );
        Ok(first_retained)
    }

    pub(crate) fn handle_status(&self) -> ConsensusStatus {
        ConsensusStatus {
            tablet_id: self.tablet_id.clone(),
            replica_id: self.my_peer_id.clone(),
            role: self.election_state.current_role(),
            current_term: self.vote_state.current_term(),
            leader_hint: self.leader_hint(),
            committed_config: self.quorum.committed_config().clone(),
            pending_config: self.quorum.pending_config().cloned(),
            last_op_id: self.tablet_log.last_op_id(),
            commit_index: self.tablet_log.commit_index(),
            fatal: self.fatal.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Peer-facing handlers. These return total responses: every failure mode
    // maps to a response variant the sender knows how to interpret.
    // ------------------------------------------------------------------

    pub(crate) fn handle_request_vote(&mut self, request: VoteRequest) -> VoteResponse {
        if let Some(reason) = &self.fatal {
            debug!(
                self.logger,
                "Rejecting vote request from {} on halted replica: {}",
                request.candidate_id,
                reason
            );
            return VoteResponse {
                responder_term: self.vote_state.current_term(),
                granted: false,
            };
        }

        match self.request_vote_impl(request) {
            Ok(granted) => VoteResponse {
                responder_term: self.vote_state.current_term(),
                granted,
            },
            Err(reason) => {
                self.fail(reason);
                VoteResponse {
                    responder_term: self.vote_state.current_term(),
                    granted: false,
                }
            }
        }
    }

    fn request_vote_impl(&mut self, request: VoteRequest) -> Result<bool, String> {
        if request.candidate_term > self.vote_state.current_term() {
            self.adopt_newer_term(request.candidate_term, None)
                .map_err(|e| e.to_string())?;
        }

        let (current_term, voted_for) = self.vote_state.voted_for_current_term();
        if request.candidate_term < current_term {
            return Ok(false);
        }
        if self.election_state.is_leader() {
            // We already won this term.
            return Ok(false);
        }

        // Leader completeness: only grant to candidates whose log is at least
        // as up to date as ours, by OpId order.
        if request.candidate_last_op_id < self.tablet_log.last_op_id() {
            debug!(
                self.logger,
                "Denying vote to {}: candidate log {:?} behind ours {:?}",
                request.candidate_id,
                request.candidate_last_op_id,
                self.tablet_log.last_op_id()
            );
            return Ok(false);
        }

        match voted_for {
            // Re-granting the recorded vote makes retried requests idempotent.
            Some(existing_vote) => Ok(existing_vote == request.candidate_id),
            None => {
                let stored = self
                    .vote_state
                    .store_vote_for_term_if_unvoted(current_term, request.candidate_id.clone())
                    .map_err(|e| e.to_string())?;
                if stored {
                    info!(
                        self.logger,
                        "Granted vote to {} for term {:?}", request.candidate_id, current_term
                    );
                    self.election_state.reset_timeout_if_follower();
                }
                Ok(stored)
            }
        }
    }

    pub(crate) fn handle_update_consensus(&mut self, request: UpdateRequest) -> UpdateResponse {
        if let Some(reason) = &self.fatal {
            return UpdateResponse {
                responder_term: self.vote_state.current_term(),
                status: UpdateStatus::Failed {
                    reason: format!("replica has halted: {}", reason),
                },
            };
        }

        match self.update_consensus_impl(request) {
            Ok(status) => UpdateResponse {
                responder_term: self.vote_state.current_term(),
                status,
            },
            Err(reason) => {
                self.fail(reason.clone());
                UpdateResponse {
                    responder_term: self.vote_state.current_term(),
                    status: UpdateStatus::Failed { reason },
                }
            }
        }
    }

    /// `Err` means a safety-critical local failure; the caller halts the
    /// replica and reports `Failed` to the leader.
    fn update_consensus_impl(&mut self, request: UpdateRequest) -> Result<UpdateStatus, String> {
        if request.term > self.vote_state.current_term() {
            self.adopt_newer_term(request.term, Some(request.leader_id.clone()))
                .map_err(|e| e.to_string())?;
        }
        let current_term = self.vote_state.current_term();
        if request.term < current_term {
            return Ok(UpdateStatus::StaleTerm);
        }
        if self.election_state.is_leader() {
            // Same term, two leaders: election safety is broken somewhere.
            return Err(format!(
                "received a leader update for term {:?} while leading that term",
                current_term
            ));
        }
        self.election_state.observe_leader(&request.leader_id);
        self.election_state.reset_timeout_if_follower();

        // Consistency check on the entry preceding the batch. Entries at or
        // below the GC floor were committed before being GC'd, so they match
        // by the log matching property and need no lookup.
        let prev = request.prev_op_id;
        let gc_floor = self.tablet_log.first_retained_index() - 1;
        if prev.index > self.tablet_log.last_op_id().index {
            return Ok(UpdateStatus::PrevOpMismatch);
        }
        if prev.index > gc_floor {
            match self.tablet_log.entry(prev.index).map_err(|e| e.to_string())? {
                Some(existing) if existing.op_id == prev => {}
                _ => return Ok(UpdateStatus::PrevOpMismatch),
            }
        }

        // Reconcile the batch against our log: skip entries we already hold,
        // truncate the divergent suffix at the first conflict, append the
        // rest.
        let mut to_append = Vec::with_capacity(request.entries.len());
        let mut truncated = false;
        for entry in request.entries {
            let index = entry.op_id.index;
            if index <= gc_floor {
                continue;
            }
            if !truncated && index <= self.tablet_log.last_op_id().index {
                let existing = self.tablet_log.entry(index).map_err(|e| e.to_string())?;
                match existing {
                    Some(existing) if existing.op_id == entry.op_id => continue,
                    _ => {
                        warn!(
                            self.logger,
                            "Log diverges from leader {} at index {}; truncating suffix",
                            request.leader_id,
                            index
                        );
                        self.tablet_log
                            .truncate_from(index)
                            .map_err(|e| format!("log reconciliation failed: {}", e))?;
                        self.quorum.abort_pending_at_or_after(index);
                        truncated = true;
                        to_append.push(entry);
                    }
                }
            } else {
                to_append.push(entry);
            }
        }

        for entry in &to_append {
            if let ReplicatedOperation::ConfigChange { new_config } = &entry.op {
                info!(
                    self.logger,
                    "Observed config change at {:?}: {:?}", entry.op_id, new_config
                );
                self.quorum.observe_appended(new_config.clone());
            }
        }
        if !to_append.is_empty() {
            self.tablet_log
                .append_from_leader(to_append)
                .map_err(|e| format!("append from leader failed: {}", e))?;
        }

        if self.tablet_log.ratchet_commit_index(request.commit_index) {
            let commit_index = self.tablet_log.commit_index();
            if let Some(config) = self.quorum.mark_committed_up_to(commit_index) {
                info!(self.logger, "Config change committed: {:?}", config);
            }
            self.tablet_log
                .apply_committed_entries()
                .map_err(|e| format!("apply of committed entries failed: {}", e))?;
        }

        Ok(UpdateStatus::Accepted {
            last_op_id: self.tablet_log.last_op_id(),
        })
    }

    // ------------------------------------------------------------------
    // Internal event handlers
    // ------------------------------------------------------------------

    pub(crate) fn handle_follower_timeout(&mut self) {
        if self.fatal.is_some() {
            return;
        }
        if self.election_state.is_leader() {
            // Stale timer from before we won.
            return;
        }
        info!(self.logger, "Leader timeout elapsed, starting election");
        self.begin_election();
    }

    pub(crate) fn handle_vote_reply_from_peer(&mut self, reply: VoteReplyFromPeer) {
        if self.fatal.is_some() {
            return;
        }
        match reply.result {
            VoteResult::Granted => {
                if reply.term != self.vote_state.current_term() {
                    return;
                }
                if let Some(votes) = self
                    .election_state
                    .add_vote_if_candidate(reply.term, reply.peer_id.clone())
                {
                    info!(
                        self.logger,
                        "Received vote from {} for term {:?} ({} total)",
                        reply.peer_id,
                        reply.term,
                        votes
                    );
                    if votes >= self.quorum.committed_config().majority_size() {
                        self.become_leader(reply.term);
                    }
                }
            }
            VoteResult::NotGranted { responder_term } => {
                if responder_term > self.vote_state.current_term() {
                    if let Err(e) = self.adopt_newer_term(responder_term, None) {
                        self.fail(e.to_string());
                    }
                }
            }
            VoteResult::Failed(reason) => {
                debug!(
                    self.logger,
                    "RequestVote to {} failed: {}", reply.peer_id, reason
                );
            }
        }
    }

    pub(crate) fn handle_leader_timer(&mut self, tick: LeaderTimerTick) {
        if self.fatal.is_some() {
            return;
        }
        if tick.term != self.vote_state.current_term() || !self.election_state.is_leader() {
            return;
        }
        self.replicate_to_peer(&tick.peer_id);
    }

    pub(crate) fn handle_update_reply_from_peer(&mut self, reply: UpdateReplyFromPeer) {
        if self.fatal.is_some() {
            return;
        }
        let descriptor = reply.descriptor;
        if descriptor.term != self.vote_state.current_term() || !self.election_state.is_leader() {
            return;
        }

        {
            let tracker = match self.election_state.leader_state_mut() {
                Some(tracker) => tracker,
                None => return,
            };
            let progress = match tracker.peer_mut(&descriptor.peer_id) {
                Some(progress) => progress,
                // The peer was removed from the config since this request.
                None => return,
            };
            if !progress.observe_reply_seq_no(descriptor.seq_no) {
                return;
            }
            match &reply.result {
                UpdateReplyResult::Accepted => {
                    progress.record_appended(descriptor.prev_log_index, descriptor.num_entries);
                }
                UpdateReplyResult::PeerMissingPrevEntry => {
                    progress.rewind_next_index();
                }
                UpdateReplyResult::StaleTerm { .. } | UpdateReplyResult::Failed(_) => {}
            }
        }

        match reply.result {
            UpdateReplyResult::Accepted => {
                self.leader_advance_commit_index();
                // Committing a removal of ourselves steps us down; only keep
                // streaming if we are still the leader and the peer is behind.
                if self.election_state.is_leader() && self.peer_is_behind(&descriptor.peer_id) {
                    self.replicate_to_peer(&descriptor.peer_id);
                }
            }
            UpdateReplyResult::PeerMissingPrevEntry => {
                self.replicate_to_peer(&descriptor.peer_id);
            }
            UpdateReplyResult::StaleTerm { responder_term } => {
                info!(
                    self.logger,
                    "Peer {} reports newer term {:?}, stepping down",
                    descriptor.peer_id,
                    responder_term
                );
                if let Err(e) = self.adopt_newer_term(responder_term, None) {
                    self.fail(e.to_string());
                }
            }
            UpdateReplyResult::Failed(reason) => {
                debug!(
                    self.logger,
                    "UpdateConsensus to {} failed: {}", descriptor.peer_id, reason
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Role transitions
    // ------------------------------------------------------------------

    fn begin_election(&mut self) {
        if !self.quorum.committed_config().is_voter(&self.my_peer_id) {
            warn!(
                self.logger,
                "Not a voter in the committed config; refusing to start an election"
            );
            return;
        }

        let term = match self.vote_state.increment_term_and_vote_for_self() {
            Ok(term) => term,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };
        info!(self.logger, "Starting election for term {:?}", term);
        self.election_state.transition_to_candidate(term);

        // The self-vote alone wins a single-voter quorum.
        if self.quorum.committed_config().majority_size() <= 1 {
            self.become_leader(term);
            return;
        }

        let candidate_last_op_id = self.tablet_log.last_op_id();
        for peer_id in self.quorum.committed_config().voter_ids() {
            if *peer_id == self.my_peer_id {
                continue;
            }
            let request = VoteRequest {
                tablet_id: self.tablet_id.clone(),
                candidate_id: self.my_peer_id.clone(),
                candidate_term: term,
                candidate_last_op_id,
            };
            tokio::task::spawn(call_peer_request_vote(
                self.transport.clone(),
                self.actor_client.clone(),
                peer_id.clone(),
                request,
                term,
                self.rpc_timeout,
            ));
        }
    }

    fn become_leader(&mut self, term: Term) {
        if self.election_state.is_leader() {
            // Late extra vote grants after winning.
            return;
        }
        info!(self.logger, "Won election, leading term {:?}", term);

        let peers = self.replication_peer_ids();
        let next_index = self.tablet_log.last_op_id().index + 1;
        self.election_state.transition_to_leader(term, peers, next_index);

        // The no-op is the first entry of our term; once it reaches a
        // majority it commits, and everything before it commits transitively.
        match self
            .tablet_log
            .append_as_leader(term, ReplicatedOperation::NoOp)
        {
            Ok(op_id) => {
                debug!(self.logger, "Appended leadership no-op at {:?}", op_id);
            }
            Err(e) => {
                self.fail(format!("failed to append leadership no-op: {}", e));
                return;
            }
        }
        self.leader_advance_commit_index();
    }

    /// Adopts a newer term observed from any message and falls back to
    /// follower. No-op if the term is not actually newer.
    fn adopt_newer_term(
        &mut self,
        new_term: Term,
        leader_id: Option<PeerId>,
    ) -> Result<(), PersistenceError> {
        if self.vote_state.store_term_if_increased(new_term)? {
            info!(self.logger, "Adopted newer term {:?}", new_term);
            self.election_state.transition_to_follower(leader_id);
        }
        Ok(())
    }

    fn fail(&mut self, reason: String) {
        error!(self.logger, "Replica halting after fatal error: {}", reason);
        self.fatal = Some(reason);
        self.election_state.transition_to_follower(None);
    }

    // ------------------------------------------------------------------
    // Leader-side replication and commit
    // ------------------------------------------------------------------

    fn replicate_to_peer(&mut self, peer_id: &PeerId) {
        let current_term = self.vote_state.current_term();
        let commit_index = self.tablet_log.commit_index();
        let last_index = self.tablet_log.last_op_id().index;
        let max_entries = self.max_entries_per_request as u64;

        let tracker = match self.election_state.leader_state_mut() {
            Some(tracker) => tracker,
            None => return,
        };
        let progress = match tracker.peer_mut(peer_id) {
            Some(progress) => progress,
            None => return,
        };
        if progress.has_outstanding_request() {
            // One request in flight per peer; the reply or its timeout
            // triggers the next one.
            return;
        }

        let next_index = progress.next_index();
        let prev_index = progress.prev_index();
        if next_index < self.tablet_log.first_retained_index() {
            warn!(
                self.logger,
                "Peer {} needs entries from index {} which were GC'd; cannot catch it up from this log",
                peer_id,
                next_index
            );
            return;
        }
        let prev_op_id = if prev_index == 0 {
            OpId::MIN
        } else {
            match self.tablet_log.entry(prev_index) {
                Ok(Some(entry)) => entry.op_id,
                _ => {
                    warn!(
                        self.logger,
                        "Peer {} needs entries from index {} which were GC'd; cannot catch it up from this log",
                        peer_id,
                        next_index
                    );
                    return;
                }
            }
        };

        let entries = if next_index > last_index {
            // Nothing new; this is a pure heartbeat carrying the commit index.
            Vec::new()
        } else {
            let end_index = (next_index + max_entries).min(last_index + 1);
            match self.tablet_log.read_range(next_index, end_index) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        self.logger,
                        "Failed reading log entries [{}, {}) for peer {}: {}",
                        next_index,
                        end_index,
                        peer_id,
                        e
                    );
                    return;
                }
            }
        };

        let descriptor = UpdateReplyDescriptor {
            peer_id: peer_id.clone(),
            term: current_term,
            seq_no: progress.next_seq_no(),
            prev_log_index: prev_index,
            num_entries: entries.len(),
        };
        let request = UpdateRequest {
            tablet_id: self.tablet_id.clone(),
            leader_id: self.my_peer_id.clone(),
            term: current_term,
            prev_op_id,
            entries,
            commit_index,
        };
        tokio::task::spawn(call_peer_update_consensus(
            self.transport.clone(),
            self.actor_client.clone(),
            descriptor,
            request,
            self.rpc_timeout,
        ));
    }

    /// Re-evaluates the commit index from peer acknowledgements and performs
    /// the post-commit work: applying entries, promoting a committed config
    /// change, stepping down if that change removed us.
    fn leader_advance_commit_index(&mut self) {
        let current_term = self.vote_state.current_term();
        let my_last_index = self.tablet_log.last_op_id().index;

        let candidate_index = {
            let tracker = match self.election_state.leader_state() {
                Some(tracker) => tracker,
                None => return,
            };
            let committed = majority_matched_index(
                self.quorum.committed_config(),
                &self.my_peer_id,
                my_last_index,
                tracker,
            );
            // While a config change is pending, commitment requires a
            // majority in both the committed and the pending config.
            match self.quorum.pending_config() {
                None => committed,
                Some(pending) => {
                    let pending_matched = majority_matched_index(
                        pending,
                        &self.my_peer_id,
                        my_last_index,
                        tracker,
                    );
                    match (committed, pending_matched) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        _ => None,
                    }
                }
            }
        };

        let candidate_index = match candidate_index {
            Some(index) => index,
            None => return,
        };
        match self
            .tablet_log
            .try_advance_commit_index(candidate_index, current_term)
        {
            Ok(true) => self.on_commit_index_advanced(current_term),
            Ok(false) => {}
            Err(e) => self.fail(format!("commit index advance failed: {}", e)),
        }
    }

    fn on_commit_index_advanced(&mut self, current_term: Term) {
        if let Err(e) = self.tablet_log.apply_committed_entries() {
            self.fail(format!("apply of committed entries failed: {}", e));
            return;
        }

        let commit_index = self.tablet_log.commit_index();
        let newly_committed = self.quorum.mark_committed_up_to(commit_index).cloned();
        if let Some(config) = newly_committed {
            info!(self.logger, "Config change committed: {:?}", config);
            if !config.contains(&self.my_peer_id) {
                info!(
                    self.logger,
                    "Removed from the committed config, stepping down"
                );
                self.election_state.transition_to_follower(None);
            } else if self.election_state.is_leader() {
                let peers = self.replication_peer_ids();
                let next_index = self.tablet_log.last_op_id().index + 1;
                self.election_state
                    .sync_leader_peers(current_term, peers, next_index);
            }
        }
    }

    fn peer_is_behind(&self, peer_id: &PeerId) -> bool {
        let last_index = self.tablet_log.last_op_id().index;
        self.election_state
            .leader_state()
            .and_then(|tracker| tracker.match_index(peer_id))
            .map(|matched| matched < last_index)
            .unwrap_or(false)
    }

    /// Everyone the leader replicates to: the union of committed and pending
    /// members, minus ourselves. Non-voters receive the log too; they just
    /// don't count toward commit.
    fn replication_peer_ids(&self) -> Vec<PeerId> {
        let mut ids: BTreeSet<PeerId> = self
            .quorum
            .committed_config()
            .member_ids()
            .cloned()
            .collect();
        if let Some(pending) = self.quorum.pending_config() {
            ids.extend(pending.member_ids().cloned());
        }
        ids.remove(&self.my_peer_id);
        ids.into_iter().collect()
    }

    fn leader_hint(&self) -> Option<PeerId> {
        match self.election_state.current_leader() {
            CurrentLeader::Me => Some(self.my_peer_id.clone()),
            CurrentLeader::Other(leader_id) => Some(leader_id),
            CurrentLeader::Unknown => None,
        }
    }
}

fn membership_to_change_config_error(e: MembershipError) -> ChangeConfigError {
    match e {
        MembershipError::AlreadyMember(id) => ChangeConfigError::MemberAlreadyInConfig(id),
        MembershipError::NotAMember(id) => ChangeConfigError::NotFound(id),
    }
}

/// The highest log index replicated on a majority of `config`'s voters, or
/// None if no index has majority support yet (including when fewer voters
/// than a majority are even tracked).
fn majority_matched_index(
    config: &QuorumConfig,
    my_peer_id: &PeerId,
    my_last_index: u64,
    tracker: &LeaderStateTracker,
) -> Option<u64> {
    let mut matched: Vec<u64> = config
        .voter_ids()
        .map(|id| {
            if id == my_peer_id {
                my_last_index
            } else {
                tracker.match_index(id).unwrap_or(0)
            }
        })
        .collect();
    compute_majority_match(&mut matched, config.majority_size())
}

/// The largest index such that at least `majority_size` of `matched` are at
/// or above it.
fn compute_majority_match(matched: &mut Vec<u64>, majority_size: usize) -> Option<u64> {
    if matched.len() < majority_size || majority_size == 0 {
        return None;
    }
    matched.sort_unstable_by(|a, b| b.cmp(a));
    Some(matched[majority_size - 1])
}

async fn call_peer_request_vote(
    transport: Arc<dyn PeerTransport>,
    actor_client: ActorClient,
    dest: PeerId,
    request: VoteRequest,
    term: Term,
    rpc_timeout: Duration,
) {
    let result = match tokio::time::timeout(rpc_timeout, transport.request_vote(&dest, request))
        .await
    {
        Ok(Ok(response)) => {
            if response.granted {
                VoteResult::Granted
            } else {
                VoteResult::NotGranted {
                    responder_term: response.responder_term,
                }
            }
        }
        Ok(Err(e)) => VoteResult::Failed(e.to_string()),
        Err(_) => VoteResult::Failed("request timed out".to_string()),
    };

    actor_client
        .notify_vote_reply(VoteReplyFromPeer {
            peer_id: dest,
            term,
            result,
        })
        .await;
}

async fn call_peer_update_consensus(
    transport: Arc<dyn PeerTransport>,
    actor_client: ActorClient,
    descriptor: UpdateReplyDescriptor,
    request: UpdateRequest,
    rpc_timeout: Duration,
) {
    let dest = descriptor.peer_id.clone();
    let result =
        match tokio::time::timeout(rpc_timeout, transport.update_consensus(&dest, request)).await {
            Ok(Ok(response)) => match response.status {
                UpdateStatus::Accepted { .. } => UpdateReplyResult::Accepted,
                UpdateStatus::PrevOpMismatch => UpdateReplyResult::PeerMissingPrevEntry,
                UpdateStatus::StaleTerm => UpdateReplyResult::StaleTerm {
                    responder_term: response.responder_term,
                },
                UpdateStatus::Failed { reason } => UpdateReplyResult::Failed(reason),
            },
            Ok(Err(e)) => UpdateReplyResult::Failed(e.to_string()),
            Err(_) => UpdateReplyResult::Failed("request timed out".to_string()),
        };

    actor_client
        .notify_update_reply(UpdateReplyFromPeer { descriptor, result })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::api::NoOpDataLayer;
    use crate::quorum::MemberType;
    use crate::replica::local_state::VolatileVoteState;
    use crate::replica::replica_api::ReplicaRole;
    use crate::transport::TransportError;
    use crate::wal::{InMemoryLog, LogEntry};
    use bytes::Bytes;

    /// A transport whose calls always fail. Unit tests drive the replica by
    /// injecting replies directly, so outbound requests only need to go
    /// somewhere harmless.
    struct NullTransport;

    #[async_trait::async_trait]
    impl PeerTransport for NullTransport {
        async fn request_vote(
            &self,
            dest: &PeerId,
            _request: VoteRequest,
        ) -> Result<VoteResponse, TransportError> {
            Err(TransportError::Unreachable(dest.clone()))
        }

        async fn update_consensus(
            &self,
            dest: &PeerId,
            _request: UpdateRequest,
        ) -> Result<UpdateResponse, TransportError> {
            Err(TransportError::Unreachable(dest.clone()))
        }
    }

    struct Fixture {
        replica: Replica<InMemoryLog, VolatileVoteState, NoOpDataLayer>,
        // Held so the replica's timers have a live event queue.
        _event_queue: crate::actor::EventReceiver,
    }

    fn fixture(me: &str, members: &[&str]) -> Fixture {
        fixture_with_log(me, members, InMemoryLog::new())
    }

    fn fixture_with_log(me: &str, members: &[&str], log: InMemoryLog) -> Fixture {
        let (actor_client, event_queue) = ActorClient::new(100);
        let my_peer_id = PeerId::new(me);
        let committed_config =
            QuorumConfig::initial(members.iter().map(|m| PeerId::new(*m)));

        let replica = Replica::new(ReplicaConfig {
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            tablet_id: TabletId::new("tablet-1"),
            my_peer_id,
            committed_config,
            log,
            vote_state: VolatileVoteState::new(PeerId::new(me)),
            data_layer: NoOpDataLayer,
            transport: Arc::new(NullTransport),
            actor_client,
            // Long enough that no timer fires during a test.
            leader_heartbeat_duration: Duration::from_secs(60),
            follower_min_timeout: Duration::from_secs(300),
            follower_max_timeout: Duration::from_secs(600),
            rpc_timeout: Duration::from_secs(5),
            max_entries_per_request: 100,
        });

        Fixture {
            replica,
            _event_queue: event_queue,
        }
    }

    fn op(term: u64, index: u64) -> OpId {
        OpId::new(Term::new(term), index)
    }

    fn write_entry(term: u64, index: u64, payload: &[u8]) -> LogEntry {
        LogEntry {
            op_id: op(term, index),
            op: ReplicatedOperation::Write {
                payload: payload.to_vec(),
            },
        }
    }

    fn vote_request(candidate: &str, term: u64, last_op: OpId) -> VoteRequest {
        VoteRequest {
            tablet_id: TabletId::new("tablet-1"),
            candidate_id: PeerId::new(candidate),
            candidate_term: Term::new(term),
            candidate_last_op_id: last_op,
        }
    }

    fn update_request(
        leader: &str,
        term: u64,
        prev: OpId,
        entries: Vec<LogEntry>,
        commit_index: u64,
    ) -> UpdateRequest {
        UpdateRequest {
            tablet_id: TabletId::new("tablet-1"),
            leader_id: PeerId::new(leader),
            term: Term::new(term),
            prev_op_id: prev,
            entries,
            commit_index,
        }
    }

    /// Drives the fixture's replica to leadership of term 1 in an a/b/c
    /// quorum by injecting a granted vote from "b".
    fn make_leader(fixture: &mut Fixture) {
        fixture.replica.handle_follower_timeout();
        assert_eq!(
            fixture.replica.handle_status().role,
            ReplicaRole::Candidate
        );
        fixture.replica.handle_vote_reply_from_peer(VoteReplyFromPeer {
            peer_id: PeerId::new("b"),
            term: Term::new(1),
            result: VoteResult::Granted,
        });
        assert_eq!(fixture.replica.handle_status().role, ReplicaRole::Leader);
    }

    #[tokio::test]
    async fn one_vote_per_term() {
        let mut fixture = fixture("a", &["a", "b", "c"]);

        let first = fixture
            .replica
            .handle_request_vote(vote_request("b", 1, OpId::MIN));
        assert!(first.granted);

        // A competing candidate in the same term is refused.
        let second = fixture
            .replica
            .handle_request_vote(vote_request("c", 1, OpId::MIN));
        assert!(!second.granted);

        // A retry of the granted request succeeds again.
        let retry = fixture
            .replica
            .handle_request_vote(vote_request("b", 1, OpId::MIN));
        assert!(retry.granted);
    }

    #[tokio::test]
    async fn vote_denied_to_candidate_with_stale_log() {
        let mut log = InMemoryLog::new();
        log.append(vec![write_entry(1, 1, b"x"), write_entry(2, 2, b"y")])
            .unwrap();
        let mut fixture = fixture_with_log("a", &["a", "b", "c"], log);

        // Same term, shorter log.
        let response = fixture
            .replica
            .handle_request_vote(vote_request("b", 3, op(2, 1)));
        assert!(!response.granted);

        // Higher last term but the newer term was adopted regardless.
        assert_eq!(
            fixture.replica.handle_status().current_term,
            Term::new(3)
        );

        // An up-to-date candidate in a later term wins the vote.
        let response = fixture
            .replica
            .handle_request_vote(vote_request("c", 4, op(2, 2)));
        assert!(response.granted);
    }

    #[tokio::test]
    async fn follower_appends_and_commits_from_leader() {
        let mut fixture = fixture("a", &["a", "b", "c"]);

        let entries = vec![
            write_entry(1, 1, b"one"),
            write_entry(1, 2, b"two"),
            write_entry(1, 3, b"three"),
        ];
        let response = fixture
            .replica
            .handle_update_consensus(update_request("b", 1, OpId::MIN, entries, 2));

        match response.status {
            UpdateStatus::Accepted { last_op_id } => assert_eq!(last_op_id, op(1, 3)),
            other => panic!("unexpected status: {:?}", other),
        }
        let status = fixture.replica.handle_status();
        assert_eq!(status.commit_index, 2);
        assert_eq!(status.leader_hint, Some(PeerId::new("b")));
        assert_eq!(status.current_term, Term::new(1));
    }

    #[tokio::test]
    async fn stale_term_update_is_rejected() {
        let mut fixture = fixture("a", &["a", "b", "c"]);
        fixture
            .replica
            .handle_update_consensus(update_request("b", 5, OpId::MIN, vec![], 0));

        let response = fixture
            .replica
            .handle_update_consensus(update_request("c", 3, OpId::MIN, vec![], 0));
        assert!(matches!(response.status, UpdateStatus::StaleTerm));
        assert_eq!(response.responder_term, Term::new(5));
    }

    #[tokio::test]
    async fn missing_prev_entry_is_reported() {
        let mut fixture = fixture("a", &["a", "b", "c"]);

        let response = fixture.replica.handle_update_consensus(update_request(
            "b",
            1,
            op(1, 5),
            vec![write_entry(1, 6, b"six")],
            0,
        ));
        assert!(matches!(response.status, UpdateStatus::PrevOpMismatch));
    }

    #[tokio::test]
    async fn divergent_suffix_is_truncated() {
        let mut log = InMemoryLog::new();
        log.append(vec![
            write_entry(1, 1, b"a"),
            write_entry(1, 2, b"b"),
            write_entry(1, 3, b"c"),
            write_entry(1, 4, b"stale"),
            write_entry(1, 5, b"stale"),
        ])
        .unwrap();
        let mut fixture = fixture_with_log("a", &["a", "b", "c"], log);

        // A term-2 leader whose log agrees through index 3 replaces our
        // uncommitted suffix.
        let response = fixture.replica.handle_update_consensus(update_request(
            "b",
            2,
            op(1, 3),
            vec![LogEntry {
                op_id: op(2, 4),
                op: ReplicatedOperation::NoOp,
            }],
            3,
        ));

        match response.status {
            UpdateStatus::Accepted { last_op_id } => assert_eq!(last_op_id, op(2, 4)),
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(fixture.replica.handle_status().commit_index, 3);
    }

    #[tokio::test]
    async fn divergent_entry_at_the_gc_boundary_is_replaced() {
        // A replica restarting after GC: entries 1-4 were applied and GC'd,
        // entry 5 is retained but turns out to be divergent.
        let mut log = InMemoryLog::new();
        log.append(vec![
            write_entry(1, 1, b"a"),
            write_entry(1, 2, b"b"),
            write_entry(1, 3, b"c"),
            write_entry(1, 4, b"d"),
            write_entry(1, 5, b"stale"),
        ])
        .unwrap();
        log.gc_up_to(4).unwrap();
        let mut fixture = fixture_with_log("a", &["a", "b", "c"], log);
        assert_eq!(fixture.replica.handle_status().commit_index, 4);

        // The term-2 leader's entry 5 differs from ours; truncating ours
        // empties the retained suffix entirely before the replacement lands.
        let response = fixture.replica.handle_update_consensus(update_request(
            "b",
            2,
            op(1, 4),
            vec![LogEntry {
                op_id: op(2, 5),
                op: ReplicatedOperation::NoOp,
            }],
            4,
        ));

        match response.status {
            UpdateStatus::Accepted { last_op_id } => assert_eq!(last_op_id, op(2, 5)),
            other => panic!("unexpected status: {:?}", other),
        }
        assert!(fixture.replica.handle_status().fatal.is_none());
    }

    #[tokio::test]
    async fn truncating_committed_entries_halts_the_replica() {
        let mut fixture = fixture("a", &["a", "b", "c"]);
        fixture.replica.handle_update_consensus(update_request(
            "b",
            1,
            OpId::MIN,
            vec![write_entry(1, 1, b"one"), write_entry(1, 2, b"two")],
            2,
        ));

        // An update claiming a different entry at committed index 2 can only
        // mean the cluster lost its safety guarantees; the replica must halt
        // rather than comply.
        let response = fixture.replica.handle_update_consensus(update_request(
            "c",
            2,
            op(1, 1),
            vec![LogEntry {
                op_id: op(2, 2),
                op: ReplicatedOperation::NoOp,
            }],
            0,
        ));
        assert!(matches!(response.status, UpdateStatus::Failed { .. }));

        let status = fixture.replica.handle_status();
        assert!(status.fatal.is_some());
        assert!(matches!(
            fixture.replica.handle_start_election(),
            Err(StartElectionError::ReplicaFailed)
        ));
    }

    #[tokio::test]
    async fn election_win_appends_no_op() {
        let mut fixture = fixture("a", &["a", "b", "c"]);
        make_leader(&mut fixture);

        let status = fixture.replica.handle_status();
        assert_eq!(status.current_term, Term::new(1));
        assert_eq!(status.last_op_id, op(1, 1));
        // Not committed yet; no majority has acknowledged the no-op.
        assert_eq!(status.commit_index, 0);
    }

    #[tokio::test]
    async fn single_voter_quorum_elects_and_commits_alone() {
        let mut fixture = fixture("a", &["a"]);

        fixture.replica.handle_start_election().unwrap();
        let status = fixture.replica.handle_status();
        assert_eq!(status.role, ReplicaRole::Leader);
        assert_eq!(status.commit_index, 1);

        let output = fixture
            .replica
            .handle_start_replication(StartReplicationInput {
                data: Bytes::from_static(b"solo"),
            })
            .unwrap();
        assert_eq!(output.op_id, op(1, 2));
        assert_eq!(fixture.replica.handle_status().commit_index, 2);
    }

    #[tokio::test]
    async fn leader_commits_after_majority_ack() {
        let mut fixture = fixture("a", &["a", "b", "c"]);
        make_leader(&mut fixture);

        let output = fixture
            .replica
            .handle_start_replication(StartReplicationInput {
                data: Bytes::from_static(b"payload"),
            })
            .unwrap();
        assert_eq!(output.op_id, op(1, 2));
        assert_eq!(fixture.replica.handle_status().commit_index, 0);

        // "b" acknowledges the no-op and the write; with the leader that is a
        // majority of {a, b, c}.
        fixture
            .replica
            .handle_update_reply_from_peer(UpdateReplyFromPeer {
                descriptor: UpdateReplyDescriptor {
                    peer_id: PeerId::new("b"),
                    term: Term::new(1),
                    seq_no: 1,
                    prev_log_index: 0,
                    num_entries: 2,
                },
                result: UpdateReplyResult::Accepted,
            });
        assert_eq!(fixture.replica.handle_status().commit_index, 2);

        // A duplicate of the same reply changes nothing.
        fixture
            .replica
            .handle_update_reply_from_peer(UpdateReplyFromPeer {
                descriptor: UpdateReplyDescriptor {
                    peer_id: PeerId::new("b"),
                    term: Term::new(1),
                    seq_no: 1,
                    prev_log_index: 0,
                    num_entries: 2,
                },
                result: UpdateReplyResult::Accepted,
            });
        assert_eq!(fixture.replica.handle_status().commit_index, 2);
    }

    #[tokio::test]
    async fn leader_steps_down_on_newer_term_in_reply() {
        let mut fixture = fixture("a", &["a", "b", "c"]);
        make_leader(&mut fixture);
        fixture
            .replica
            .handle_start_replication(StartReplicationInput {
                data: Bytes::from_static(b"w"),
            })
            .unwrap();

        fixture
            .replica
            .handle_update_reply_from_peer(UpdateReplyFromPeer {
                descriptor: UpdateReplyDescriptor {
                    peer_id: PeerId::new("b"),
                    term: Term::new(1),
                    seq_no: 1,
                    prev_log_index: 0,
                    num_entries: 2,
                },
                result: UpdateReplyResult::StaleTerm {
                    responder_term: Term::new(4),
                },
            });

        let status = fixture.replica.handle_status();
        assert_eq!(status.role, ReplicaRole::Follower);
        assert_eq!(status.current_term, Term::new(4));
        assert!(matches!(
            fixture.replica.handle_start_replication(StartReplicationInput {
                data: Bytes::from_static(b"x"),
            }),
            Err(StartReplicationError::NotLeader { .. })
        ));
    }

    #[tokio::test]
    async fn replication_requires_leadership() {
        let mut fixture = fixture("a", &["a", "b", "c"]);
        fixture
            .replica
            .handle_update_consensus(update_request("b", 1, OpId::MIN, vec![], 0));

        match fixture.replica.handle_start_replication(StartReplicationInput {
            data: Bytes::from_static(b"w"),
        }) {
            Err(StartReplicationError::NotLeader { leader_hint }) => {
                assert_eq!(leader_hint, Some(PeerId::new("b")));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn config_change_is_pending_until_committed() {
        let mut fixture = fixture("a", &["a"]);
        fixture.replica.handle_start_election().unwrap();

        fixture
            .replica
            .handle_change_config(ConfigChange::AddServer {
                peer_id: PeerId::new("b"),
                member_type: MemberType::Voter,
            })
            .unwrap();

        let status = fixture.replica.handle_status();
        let pending = status.pending_config.expect("change should be pending");
        assert!(pending.contains(&PeerId::new("b")));
        assert_eq!(pending.opid_index(), 2);
        assert!(!status.committed_config.contains(&PeerId::new("b")));
        // Both the old and the new config must reach majority; "b" has not
        // acknowledged anything yet.
        assert_eq!(status.commit_index, 1);

        // A second change is refused while one is in flight.
        assert!(matches!(
            fixture.replica.handle_change_config(ConfigChange::AddServer {
                peer_id: PeerId::new("c"),
                member_type: MemberType::Voter,
            }),
            Err(ChangeConfigError::ConfigChangeInProgress)
        ));

        // "b" catches up; the change commits and the config is promoted.
        fixture
            .replica
            .handle_update_reply_from_peer(UpdateReplyFromPeer {
                descriptor: UpdateReplyDescriptor {
                    peer_id: PeerId::new("b"),
                    term: Term::new(1),
                    seq_no: 1,
                    prev_log_index: 0,
                    num_entries: 2,
                },
                result: UpdateReplyResult::Accepted,
            });
        let status = fixture.replica.handle_status();
        assert!(status.pending_config.is_none());
        assert!(status.committed_config.contains(&PeerId::new("b")));
        assert_eq!(status.commit_index, 2);
    }

    #[tokio::test]
    async fn config_change_validates_membership() {
        let mut fixture = fixture("a", &["a"]);
        fixture.replica.handle_start_election().unwrap();

        assert!(matches!(
            fixture.replica.handle_change_config(ConfigChange::AddServer {
                peer_id: PeerId::new("a"),
                member_type: MemberType::Voter,
            }),
            Err(ChangeConfigError::MemberAlreadyInConfig(_))
        ));
        assert!(matches!(
            fixture
                .replica
                .handle_change_config(ConfigChange::RemoveServer {
                    peer_id: PeerId::new("z"),
                }),
            Err(ChangeConfigError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn leader_steps_down_when_its_removal_commits() {
        let mut fixture = fixture("a", &["a", "b"]);
        fixture.replica.handle_follower_timeout();
        fixture.replica.handle_vote_reply_from_peer(VoteReplyFromPeer {
            peer_id: PeerId::new("b"),
            term: Term::new(1),
            result: VoteResult::Granted,
        });
        assert_eq!(fixture.replica.handle_status().role, ReplicaRole::Leader);

        fixture
            .replica
            .handle_change_config(ConfigChange::RemoveServer {
                peer_id: PeerId::new("a"),
            })
            .unwrap();

        // "b" acknowledges the no-op and the removal entry. That commits the
        // change under both configs, and the leader is no longer a member.
        fixture
            .replica
            .handle_update_reply_from_peer(UpdateReplyFromPeer {
                descriptor: UpdateReplyDescriptor {
                    peer_id: PeerId::new("b"),
                    term: Term::new(1),
                    seq_no: 1,
                    prev_log_index: 0,
                    num_entries: 2,
                },
                result: UpdateReplyResult::Accepted,
            });

        let status = fixture.replica.handle_status();
        assert_eq!(status.role, ReplicaRole::Follower);
        assert!(!status.committed_config.contains(&PeerId::new("a")));
        assert_eq!(status.commit_index, 2);
    }

    #[tokio::test]
    async fn step_down_requires_leadership() {
        let mut fixture = fixture("a", &["a", "b", "c"]);
        assert!(matches!(
            fixture.replica.handle_step_down(),
            Err(StepDownError::NotLeader)
        ));

        make_leader(&mut fixture);
        fixture.replica.handle_step_down().unwrap();
        assert_eq!(fixture.replica.handle_status().role, ReplicaRole::Follower);
    }

    #[tokio::test]
    async fn gc_reclaims_applied_prefix() {
        let mut fixture = fixture("a", &["a"]);
        fixture.replica.handle_start_election().unwrap();
        fixture
            .replica
            .handle_start_replication(StartReplicationInput {
                data: Bytes::from_static(b"w1"),
            })
            .unwrap();
        assert_eq!(fixture.replica.handle_status().commit_index, 2);

        // Everything up to the apply cursor may go, minus the tail entry.
        assert_eq!(fixture.replica.handle_gc_log().unwrap(), 2);

        fixture
            .replica
            .handle_start_replication(StartReplicationInput {
                data: Bytes::from_static(b"w2"),
            })
            .unwrap();
        assert_eq!(fixture.replica.handle_gc_log().unwrap(), 3);
        assert_eq!(fixture.replica.handle_status().last_op_id, op(1, 3));
    }

    #[tokio::test]
    async fn gc_retains_entries_the_slowest_peer_needs() {
        let mut fixture = fixture("a", &["a", "b", "c"]);
        make_leader(&mut fixture);
        fixture
            .replica
            .handle_start_replication(StartReplicationInput {
                data: Bytes::from_static(b"w"),
            })
            .unwrap();

        // "b" acknowledges the no-op and the write, which commits them; "c"
        // has acknowledged nothing, so GC must not move.
        fixture
            .replica
            .handle_update_reply_from_peer(UpdateReplyFromPeer {
                descriptor: UpdateReplyDescriptor {
                    peer_id: PeerId::new("b"),
                    term: Term::new(1),
                    seq_no: 1,
                    prev_log_index: 0,
                    num_entries: 2,
                },
                result: UpdateReplyResult::Accepted,
            });
        assert_eq!(fixture.replica.handle_status().commit_index, 2);
        assert_eq!(fixture.replica.handle_gc_log().unwrap(), 1);

        // Once "c" catches up, the applied prefix becomes reclaimable.
        fixture
            .replica
            .handle_update_reply_from_peer(UpdateReplyFromPeer {
                descriptor: UpdateReplyDescriptor {
                    peer_id: PeerId::new("c"),
                    term: Term::new(1),
                    seq_no: 1,
                    prev_log_index: 0,
                    num_entries: 2,
                },
                result: UpdateReplyResult::Accepted,
            });
        assert_eq!(fixture.replica.handle_gc_log().unwrap(), 2);
    }

    #[tokio::test]
    async fn former_leader_grants_vote_in_next_term() {
        let mut fixture = fixture("a", &["a", "b", "c"]);
        make_leader(&mut fixture);
        fixture
            .replica
            .handle_start_replication(StartReplicationInput {
                data: Bytes::from_static(b"w"),
            })
            .unwrap();
        fixture.replica.handle_step_down().unwrap();

        // A candidate whose log includes everything we wrote gets our vote.
        let response = fixture
            .replica
            .handle_request_vote(vote_request("b", 2, op(1, 2)));
        assert!(response.granted);
        assert_eq!(fixture.replica.handle_status().current_term, Term::new(2));

        // One with a shorter log does not, even after we voted in this term
        // for someone else.
        let response = fixture
            .replica
            .handle_request_vote(vote_request("c", 2, op(1, 1)));
        assert!(!response.granted);
    }

    #[test]
    fn majority_match_table() {
        fn run(expected: Option<u64>, mut matched: Vec<u64>, majority_size: usize) {
            assert_eq!(
                compute_majority_match(&mut matched, majority_size),
                expected
            );
        }

        run(Some(7), vec![7], 1);
        run(Some(3), vec![5, 3, 0], 2);
        run(Some(0), vec![5, 0, 0], 2);
        run(Some(4), vec![9, 4, 4, 2, 1], 3);
        run(Some(5), vec![5, 5, 5], 2);
        run(None, vec![5], 2);
        run(None, vec![], 1);
        run(None, vec![1, 2, 3], 0);
    }
}
