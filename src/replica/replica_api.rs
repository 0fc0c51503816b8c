use crate::ids::{PeerId, TabletId};
use crate::quorum::{MemberType, QuorumConfig};
use crate::wal::{LogError, OpId, Term};
use bytes::Bytes;

/// The role a replica currently holds. Exactly one at any instant; a replica
/// cycles among these for its operational lifetime.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReplicaRole {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug)]
pub(crate) struct StartReplicationInput {
    pub(crate) data: Bytes,
}

#[derive(Debug)]
pub(crate) struct StartReplicationOutput {
    /// OpId the write was enqueued at. Commitment is observed through the
    /// data layer's apply callback.
    pub(crate) op_id: OpId,
}

#[derive(Debug, thiserror::Error)]
pub enum StartReplicationError {
    #[error("not leader; current leader hint: {leader_hint:?}")]
    NotLeader { leader_hint: Option<PeerId> },

    #[error("failed to append to the local log")]
    LogAppend(#[from] LogError),

    #[error("replica has halted after a fatal error")]
    ReplicaFailed,

    #[error("replica has shut down")]
    ActorExited,
}

/// A requested membership change. Carried into the log as a CONFIG_CHANGE
/// entry holding the resulting configuration.
#[derive(Clone, Debug)]
pub enum ConfigChange {
    AddServer {
        peer_id: PeerId,
        member_type: MemberType,
    },
    RemoveServer {
        peer_id: PeerId,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ChangeConfigError {
    #[error("not leader; current leader hint: {leader_hint:?}")]
    NotLeader { leader_hint: Option<PeerId> },

    #[error("another configuration change is already in progress")]
    ConfigChangeInProgress,

    #[error("peer {0} is already in the configuration")]
    MemberAlreadyInConfig(PeerId),

    #[error("peer {0} not found in the configuration")]
    NotFound(PeerId),

    #[error("failed to append the configuration change to the local log")]
    LogAppend(#[from] LogError),

    #[error("replica has halted after a fatal error")]
    ReplicaFailed,

    #[error("replica has shut down")]
    ActorExited,
}

#[derive(Debug, thiserror::Error)]
pub enum StartElectionError {
    #[error("replica has halted after a fatal error")]
    ReplicaFailed,

    #[error("replica has shut down")]
    ActorExited,
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("replica has shut down")]
    ActorExited,
}

#[derive(Debug, thiserror::Error)]
pub enum GcLogError {
    #[error("log GC failed: {0}")]
    Log(#[from] LogError),

    #[error("replica has halted after a fatal error")]
    ReplicaFailed,

    #[error("replica has shut down")]
    ActorExited,
}

#[derive(Debug, thiserror::Error)]
pub enum StepDownError {
    #[error("replica is not the leader")]
    NotLeader,

    #[error("replica has halted after a fatal error")]
    ReplicaFailed,

    #[error("replica has shut down")]
    ActorExited,
}

/// Snapshot of a replica's consensus state, served by the control surface.
#[derive(Clone, Debug)]
pub struct ConsensusStatus {
    pub tablet_id: TabletId,
    pub replica_id: PeerId,
    pub role: ReplicaRole,
    pub current_term: Term,
    pub leader_hint: Option<PeerId>,
    pub committed_config: QuorumConfig,
    pub pending_config: Option<QuorumConfig>,
    pub last_op_id: OpId,
    pub commit_index: u64,
    /// Set once the replica has halted after a safety-critical failure.
    pub fatal: Option<String>,
}

/// Outcome of one outbound RequestVote call, posted back to the event loop.
#[derive(Debug)]
pub(crate) struct VoteReplyFromPeer {
    pub(crate) peer_id: PeerId,
    /// Term the election was held in, to discard replies to stale elections.
    pub(crate) term: Term,
    pub(crate) result: VoteResult,
}

#[derive(Debug)]
pub(crate) enum VoteResult {
    Granted,
    NotGranted { responder_term: Term },
    Failed(String),
}

/// Outcome of one outbound UpdateConsensus call.
#[derive(Debug)]
pub(crate) struct UpdateReplyFromPeer {
    pub(crate) descriptor: UpdateReplyDescriptor,
    pub(crate) result: UpdateReplyResult,
}

/// What the leader needs to remember about the request to interpret its
/// reply: which peer, which term, the per-peer sequence number, and how much
/// log the request carried.
#[derive(Clone, Debug)]
pub(crate) struct UpdateReplyDescriptor {
    pub(crate) peer_id: PeerId,
    pub(crate) term: Term,
    pub(crate) seq_no: u64,
    pub(crate) prev_log_index: u64,
    pub(crate) num_entries: usize,
}

#[derive(Debug)]
pub(crate) enum UpdateReplyResult {
    Accepted,
    PeerMissingPrevEntry,
    StaleTerm { responder_term: Term },
    Failed(String),
}

/// One tick of a leader's per-peer replication timer.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LeaderTimerTick {
    pub(crate) peer_id: PeerId,
    pub(crate) term: Term,
}
