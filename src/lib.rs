mod actor;
mod api;
mod ids;
mod quorum;
mod replica;
mod tablet;
mod transport;
mod wal;

pub use api::start_tablet_replica;
pub use api::ApplyError;
pub use api::ConsensusOptions;
pub use api::NoOpDataLayer;
pub use api::ReplicaCreationError;
pub use api::TabletDataLayer;
pub use api::TabletHandle;
pub use api::TabletReplicaConfig;
pub use ids::PeerId;
pub use ids::TabletId;
pub use quorum::MemberType;
pub use quorum::MembershipError;
pub use quorum::QuorumConfig;
pub use replica::ChangeConfigError;
pub use replica::ConfigChange;
pub use replica::ConsensusStatus;
pub use replica::DurableVoteState;
pub use replica::GcLogError;
pub use replica::PersistenceError;
pub use replica::PersistentVoteState;
pub use replica::ReplicaRole;
pub use replica::StartElectionError;
pub use replica::StartReplicationError;
pub use replica::StatusError;
pub use replica::StepDownError;
pub use replica::VolatileVoteState;
pub use tablet::TabletManager;
pub use transport::InProcessRouter;
pub use transport::PeerTransport;
pub use transport::TransportError;
pub use transport::UpdateRequest;
pub use transport::UpdateResponse;
pub use transport::UpdateStatus;
pub use transport::VoteRequest;
pub use transport::VoteResponse;
pub use wal::FileLog;
pub use wal::InMemoryLog;
pub use wal::Log;
pub use wal::LogEntry;
pub use wal::LogError;
pub use wal::OpId;
pub use wal::ReplicatedOperation;
pub use wal::Term;

// All `mod` statements are private; the public surface is the explicit `pub use`
// list above, so the internal module layout can change without breaking callers.
