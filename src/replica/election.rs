use crate::actor::ActorClient;
use crate::ids::PeerId;
use crate::replica::replica_api::ReplicaRole;
use crate::replica::timers::{FollowerTimerHandle, LeaderTimerHandle};
use crate::wal::Term;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::time::Duration;

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub(crate) my_peer_id: PeerId,
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
}

/// The per-replica role state machine: FOLLOWER, CANDIDATE, or LEADER, plus
/// the transient bookkeeping each role carries (timers, vote tally, peer
/// replication progress). Role transitions swap the whole state struct, which
/// drops the old role's timers.
pub(crate) struct ElectionState {
    state: State,
    config: ElectionConfig,
    actor_client: ActorClient,
}

impl ElectionState {
    /// A replica always starts (and restarts) as follower; it trusts only
    /// persisted term/vote/log state and waits to hear from a leader.
    pub(crate) fn new_follower(config: ElectionConfig, actor_client: ActorClient) -> Self {
        ElectionState {
            state: State::Follower(FollowerState::new(
                config.follower_min_timeout,
                config.follower_max_timeout,
                actor_client.clone(),
            )),
            config,
            actor_client,
        }
    }

    pub(crate) fn current_role(&self) -> ReplicaRole {
        match &self.state {
            State::Leader(_) => ReplicaRole::Leader,
            State::Candidate(_) => ReplicaRole::Candidate,
            State::Follower(_) => ReplicaRole::Follower,
        }
    }

    pub(crate) fn current_leader(&self) -> CurrentLeader {
        match &self.state {
            State::Leader(_) => CurrentLeader::Me,
            State::Candidate(_) => CurrentLeader::Unknown,
            State::Follower(FollowerState { leader_id: None, .. }) => CurrentLeader::Unknown,
            State::Follower(FollowerState {
                leader_id: Some(leader_id),
                ..
            }) => CurrentLeader::Other(leader_id.clone()),
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(&self.state, State::Leader(_))
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(fs) = &self.state {
            fs.reset_timeout();
        }
    }

    /// Called when a valid UpdateConsensus for the current term arrives.
    /// A candidate observing a legitimate leader concedes; a follower learns
    /// who to redirect to.
    pub(crate) fn observe_leader(&mut self, leader_id: &PeerId) {
        match &mut self.state {
            State::Follower(fs) => {
                if fs.leader_id.is_none() {
                    fs.leader_id = Some(leader_id.clone());
                }
            }
            State::Candidate(_) => {
                self.transition_to_follower(Some(leader_id.clone()));
            }
            State::Leader(_) => {
                // Two leaders in one term would be an election-safety bug;
                // the caller rejects the message before reaching here.
            }
        }
    }

    /// Starts an election for `term`. The self-vote is tallied immediately.
    pub(crate) fn transition_to_candidate(&mut self, term: Term) {
        let mut candidate = CandidateState::new(
            term,
            self.config.follower_min_timeout,
            self.config.follower_max_timeout,
            self.actor_client.clone(),
        );
        candidate.add_received_vote(self.config.my_peer_id.clone());
        self.state = State::Candidate(candidate);
    }

    /// Tallies a granted vote. Returns the updated number of unique votes, or
    /// None if we are not (or no longer) a candidate for `term`.
    pub(crate) fn add_vote_if_candidate(&mut self, term: Term, vote_from: PeerId) -> Option<usize> {
        if let State::Candidate(cs) = &mut self.state {
            if cs.term == term {
                return Some(cs.add_received_vote(vote_from));
            }
        }
        None
    }

    /// Won the election: build fresh replication progress for every peer,
    /// all initialized at `next_index` (leader's last log index + 1), and
    /// start per-peer replication timers.
    pub(crate) fn transition_to_leader(
        &mut self,
        term: Term,
        peer_ids: Vec<PeerId>,
        next_index: u64,
    ) {
        let mut peer_progress = HashMap::with_capacity(peer_ids.len());
        for peer_id in peer_ids {
            let progress = PeerProgress::new(
                LeaderTimerHandle::spawn_background_task(
                    self.config.leader_heartbeat_duration,
                    self.actor_client.clone(),
                    peer_id.clone(),
                    term,
                ),
                next_index,
            );
            peer_progress.insert(peer_id, progress);
        }
        self.state = State::Leader(LeaderStateTracker::new(peer_progress));
    }

    /// Reconciles the tracked peer set with a changed configuration: new
    /// members get fresh progress (and a timer), removed members are dropped
    /// (stopping their timer). Existing progress is preserved.
    pub(crate) fn sync_leader_peers(&mut self, term: Term, peer_ids: Vec<PeerId>, next_index: u64) {
        let config = self.config.clone();
        let actor_client = self.actor_client.clone();
        if let State::Leader(tracker) = &mut self.state {
            let desired: HashSet<PeerId> = peer_ids.into_iter().collect();
            tracker.peer_progress.retain(|id, _| desired.contains(id));
            for peer_id in desired {
                tracker.peer_progress.entry(peer_id.clone()).or_insert_with(|| {
                    PeerProgress::new(
                        LeaderTimerHandle::spawn_background_task(
                            config.leader_heartbeat_duration,
                            actor_client.clone(),
                            peer_id,
                            term,
                        ),
                        next_index,
                    )
                });
            }
        }
    }

    pub(crate) fn transition_to_follower(&mut self, leader_id: Option<PeerId>) {
        self.state = State::Follower(FollowerState::with_leader_info(
            leader_id,
            self.config.follower_min_timeout,
            self.config.follower_max_timeout,
            self.actor_client.clone(),
        ));
    }

    pub(crate) fn leader_state(&self) -> Option<&LeaderStateTracker> {
        match &self.state {
            State::Leader(tracker) => Some(tracker),
            _ => None,
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        match &mut self.state {
            State::Leader(tracker) => Some(tracker),
            _ => None,
        }
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(cs) => write!(f, "Candidate(Term={:?})", cs.term),
            State::Follower(FollowerState {
                leader_id: Some(leader_id),
                ..
            }) => write!(f, "Follower(Leader={})", leader_id),
            State::Follower(FollowerState { leader_id: None, .. }) => {
                write!(f, "Follower(Leader=None)")
            }
        }
    }
}

#[derive(Eq, PartialEq, Debug)]
pub(crate) enum CurrentLeader {
    Me,
    Other(PeerId),
    Unknown,
}

enum State {
    Leader(LeaderStateTracker),
    Candidate(CandidateState),
    Follower(FollowerState),
}

struct CandidateState {
    term: Term,
    received_votes_from: HashSet<PeerId>,
    // Candidate keeps the randomized timeout running; if the election stalls
    // (split vote, unreachable peers) it fires and a new election starts at
    // the next term.
    _election_timeout_tracker: FollowerTimerHandle,
}

struct FollowerState {
    leader_id: Option<PeerId>,
    follower_timeout_tracker: FollowerTimerHandle,
}

impl CandidateState {
    fn new(
        term: Term,
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: ActorClient,
    ) -> Self {
        CandidateState {
            term,
            received_votes_from: HashSet::new(),
            _election_timeout_tracker: FollowerTimerHandle::spawn_background_task(
                min_timeout,
                max_timeout,
                actor_client,
            ),
        }
    }

    /// Returns the number of unique votes received so far.
    fn add_received_vote(&mut self, vote_from: PeerId) -> usize {
        self.received_votes_from.insert(vote_from);
        self.received_votes_from.len()
    }
}

impl FollowerState {
    fn new(min_timeout: Duration, max_timeout: Duration, actor_client: ActorClient) -> Self {
        Self::with_leader_info(None, min_timeout, max_timeout, actor_client)
    }

    fn with_leader_info(
        leader_id: Option<PeerId>,
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: ActorClient,
    ) -> Self {
        FollowerState {
            leader_id,
            follower_timeout_tracker: FollowerTimerHandle::spawn_background_task(
                min_timeout,
                max_timeout,
                actor_client,
            ),
        }
    }

    fn reset_timeout(&self) {
        self.follower_timeout_tracker.reset_timeout();
    }
}

/// Leader-only view of every peer's replication progress. Rebuilt on each
/// election win; never persisted.
pub(crate) struct LeaderStateTracker {
    peer_progress: HashMap<PeerId, PeerProgress>,
}

impl LeaderStateTracker {
    fn new(peer_progress: HashMap<PeerId, PeerProgress>) -> Self {
        LeaderStateTracker { peer_progress }
    }

    pub(crate) fn peer_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerProgress> {
        self.peer_progress.get_mut(peer_id)
    }

    pub(crate) fn match_index(&self, peer_id: &PeerId) -> Option<u64> {
        self.peer_progress.get(peer_id).map(|p| p.match_index)
    }

    /// The lowest match index among all tracked peers, or None when no peers
    /// are tracked (single-voter quorum).
    pub(crate) fn min_match_index(&self) -> Option<u64> {
        self.peer_progress.values().map(|p| p.match_index).min()
    }
}

pub(crate) struct PeerProgress {
    // Held to keep this peer's replication timer alive.
    _timer: LeaderTimerHandle,

    /// Index of the next log entry to send. Initialized to leader's last log
    /// index + 1; walked back on prev-entry mismatches until the logs agree.
    next_index: u64,
    /// Highest log index known durable on the peer. 0 until the first
    /// successful append acknowledgement; increases monotonically afterward.
    match_index: u64,

    /// Logical clock over this leader's requests to this peer. A reply
    /// carrying a seq_no older than one already processed is discarded, which
    /// makes duplicate and reordered replies harmless.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,
}

impl PeerProgress {
    fn new(timer: LeaderTimerHandle, next_index: u64) -> Self {
        PeerProgress {
            _timer: timer,
            next_index,
            match_index: 0,
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
        }
    }

    pub(crate) fn next_index(&self) -> u64 {
        self.next_index
    }

    pub(crate) fn prev_index(&self) -> u64 {
        self.next_index - 1
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    pub(crate) fn next_seq_no(&mut self) -> u64 {
        self.last_sent_seq_no += 1;
        self.last_sent_seq_no
    }

    /// Ratchets the received seq-no forward. Returns false for duplicate,
    /// reordered, or never-sent seq-nos, whose replies must be dropped.
    pub(crate) fn observe_reply_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }

    /// A successful append of `num_entries` entries after `prev_log_index`.
    pub(crate) fn record_appended(&mut self, prev_log_index: u64, num_entries: usize) {
        if num_entries == 0 {
            // Plain heartbeat; nothing new replicated.
            return;
        }
        let new_match = prev_log_index + num_entries as u64;
        if new_match > self.match_index {
            self.match_index = new_match;
        }
        if new_match + 1 > self.next_index {
            self.next_index = new_match + 1;
        }
    }

    /// Peer rejected the prev-entry check: walk one entry back and retry on
    /// the next tick.
    pub(crate) fn rewind_next_index(&mut self) {
        if self.next_index > 1 {
            self.next_index -= 1;
        }
    }
}
