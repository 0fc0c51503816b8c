use crate::actor::ActorClient;
use crate::ids::TabletId;
use crate::replica::{
    ChangeConfigError, ConfigChange, ConsensusStatus, GcLogError, StartElectionError,
    StartReplicationError, StartReplicationInput, StatusError, StepDownError,
};
use crate::wal::OpId;
use bytes::Bytes;

/// Cheaply cloneable handle to one running tablet replica. This is the whole
/// client-facing surface: data replication plus the operator control plane.
#[derive(Clone)]
pub struct TabletHandle {
    tablet_id: TabletId,
    actor_client: ActorClient,
}

impl TabletHandle {
    pub(crate) fn new(tablet_id: TabletId, actor_client: ActorClient) -> Self {
        TabletHandle {
            tablet_id,
            actor_client,
        }
    }

    pub fn tablet_id(&self) -> &TabletId {
        &self.tablet_id
    }

    pub(crate) fn actor_client(&self) -> &ActorClient {
        &self.actor_client
    }

    /// Submits an opaque write for replication. Success means the write is
    /// durably appended on the leader at the returned OpId and replication
    /// has begun; commitment is observed through the data layer.
    pub async fn start_replication(&self, data: Bytes) -> Result<OpId, StartReplicationError> {
        self.actor_client
            .start_replication(StartReplicationInput { data })
            .await
            .map(|output| output.op_id)
    }

    /// Adds or removes one member. At most one change may be in flight per
    /// tablet; the change takes effect when its log entry commits.
    pub async fn change_config(&self, change: ConfigChange) -> Result<(), ChangeConfigError> {
        self.actor_client.change_config(change).await
    }

    /// Forces an election on this replica, bypassing the follower timeout.
    /// A no-op if the replica already leads.
    pub async fn start_election(&self) -> Result<(), StartElectionError> {
        self.actor_client.start_election().await
    }

    /// Makes a leader relinquish leadership without leaving the quorum.
    pub async fn step_down(&self) -> Result<(), StepDownError> {
        self.actor_client.step_down().await
    }

    pub async fn status(&self) -> Result<ConsensusStatus, StatusError> {
        self.actor_client.status().await
    }

    /// Reclaims log entries already handed to the data layer. On a leader,
    /// entries the slowest tracked peer still needs are retained. Returns the
    /// first retained index after GC. Called by the host on its own retention
    /// cadence; consensus itself never discards log entries.
    pub async fn gc_log(&self) -> Result<u64, GcLogError> {
        self.actor_client.gc_log().await
    }

    /// OpId of the last entry in this replica's log.
    pub async fn last_op_id(&self) -> Result<OpId, StatusError> {
        self.status().await.map(|status| status.last_op_id)
    }
}
