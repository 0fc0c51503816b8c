mod election;
mod local_state;
mod replica;
mod replica_api;
mod tablet_log;
mod timers;

pub use local_state::DurableVoteState;
pub use local_state::PersistenceError;
pub use local_state::PersistentVoteState;
pub use local_state::VolatileVoteState;
pub use replica_api::ChangeConfigError;
pub use replica_api::ConfigChange;
pub use replica_api::ConsensusStatus;
pub use replica_api::GcLogError;
pub use replica_api::ReplicaRole;
pub use replica_api::StartElectionError;
pub use replica_api::StartReplicationError;
pub use replica_api::StatusError;
pub use replica_api::StepDownError;

pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaConfig;
pub(crate) use replica_api::LeaderTimerTick;
pub(crate) use replica_api::StartReplicationInput;
pub(crate) use replica_api::StartReplicationOutput;
pub(crate) use replica_api::UpdateReplyDescriptor;
pub(crate) use replica_api::UpdateReplyFromPeer;
pub(crate) use replica_api::UpdateReplyResult;
pub(crate) use replica_api::VoteReplyFromPeer;
pub(crate) use replica_api::VoteResult;
