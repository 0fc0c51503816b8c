//! The seam between the consensus module and whatever carries its messages.
//!
//! Consensus holds only opaque `PeerId`s; the transport owns connections and
//! delivery. Delivery may be at-least-once and out of order; the consensus
//! handlers are idempotent to duplicates and stale messages via term and
//! sequence-number checks, so implementations need not deduplicate.

use crate::actor::ActorClient;
use crate::ids::{PeerId, TabletId};
use crate::wal::{LogEntry, OpId, Term};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// A candidate asking for a vote in `candidate_term`.
#[derive(Clone, Debug)]
pub struct VoteRequest {
    pub tablet_id: TabletId,
    pub candidate_id: PeerId,
    pub candidate_term: Term,
    pub candidate_last_op_id: OpId,
}

/// Vote responses are total: a stale-term request is answered with
/// `granted: false` plus the responder's newer term, which is all the
/// candidate needs to abandon the election.
#[derive(Clone, Debug)]
pub struct VoteResponse {
    pub responder_term: Term,
    pub granted: bool,
}

/// Leader-driven log replication plus heartbeat (the append-entries
/// analogue). The commit index piggybacks on every round; there is no
/// separate commit RPC.
#[derive(Clone, Debug)]
pub struct UpdateRequest {
    pub tablet_id: TabletId,
    pub leader_id: PeerId,
    pub term: Term,
    /// OpId of the entry immediately preceding `entries`. `OpId::MIN` when
    /// replicating from the start of the log.
    pub prev_op_id: OpId,
    pub entries: Vec<LogEntry>,
    pub commit_index: u64,
}

#[derive(Clone, Debug)]
pub struct UpdateResponse {
    pub responder_term: Term,
    pub status: UpdateStatus,
}

#[derive(Clone, Debug)]
pub enum UpdateStatus {
    /// Entries are durable; `last_op_id` is the responder's new log tail.
    Accepted { last_op_id: OpId },
    /// The responder's log has no entry matching `prev_op_id`. The leader
    /// walks `next_index` back and retries; never surfaced to callers.
    PrevOpMismatch,
    /// The request's term is older than the responder's.
    StaleTerm,
    /// The responder could not process the request (halted replica, storage
    /// failure, unrecognized sender). Retried on the heartbeat cadence.
    Failed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(PeerId),
    #[error("peer {peer} does not host tablet {tablet}")]
    UnknownTablet { peer: PeerId, tablet: TabletId },
    #[error("transport failure: {0}")]
    Other(String),
}

/// Outbound half of the consensus message exchange. Implementations resolve
/// `PeerId`s to real connections; the in-process router below is the
/// reference implementation used by tests and single-process embeddings.
#[async_trait::async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn request_vote(
        &self,
        dest: &PeerId,
        request: VoteRequest,
    ) -> Result<VoteResponse, TransportError>;

    async fn update_consensus(
        &self,
        dest: &PeerId,
        request: UpdateRequest,
    ) -> Result<UpdateResponse, TransportError>;
}

/// Routes consensus messages between replicas living in the same process by
/// handing them straight to the destination replica's event queue.
pub struct InProcessRouter {
    routes: RwLock<HashMap<(PeerId, TabletId), ActorClient>>,
}

impl InProcessRouter {
    pub fn new() -> Self {
        InProcessRouter {
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Makes `handle`'s replica reachable as `peer_id` for its tablet.
    pub fn register_replica(&self, peer_id: PeerId, handle: &crate::api::TabletHandle) {
        self.register(
            peer_id,
            handle.tablet_id().clone(),
            handle.actor_client().clone(),
        );
    }

    pub(crate) fn register(&self, peer_id: PeerId, tablet_id: TabletId, client: ActorClient) {
        self.routes
            .write()
            .expect("router lock poisoned")
            .insert((peer_id, tablet_id), client);
    }

    pub fn deregister(&self, peer_id: &PeerId, tablet_id: &TabletId) {
        self.routes
            .write()
            .expect("router lock poisoned")
            .remove(&(peer_id.clone(), tablet_id.clone()));
    }

    fn route(&self, dest: &PeerId, tablet_id: &TabletId) -> Result<ActorClient, TransportError> {
        self.routes
            .read()
            .expect("router lock poisoned")
            .get(&(dest.clone(), tablet_id.clone()))
            .cloned()
            .ok_or_else(|| TransportError::UnknownTablet {
                peer: dest.clone(),
                tablet: tablet_id.clone(),
            })
    }
}

impl Default for InProcessRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InProcessRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes = self.routes.read().expect("router lock poisoned");
        write!(f, "InProcessRouter({} routes)", routes.len())
    }
}

#[async_trait::async_trait]
impl PeerTransport for InProcessRouter {
    async fn request_vote(
        &self,
        dest: &PeerId,
        request: VoteRequest,
    ) -> Result<VoteResponse, TransportError> {
        let client = self.route(dest, &request.tablet_id)?;
        client
            .request_vote(request)
            .await
            .map_err(|_| TransportError::Unreachable(dest.clone()))
    }

    async fn update_consensus(
        &self,
        dest: &PeerId,
        request: UpdateRequest,
    ) -> Result<UpdateResponse, TransportError> {
        let client = self.route(dest, &request.tablet_id)?;
        client
            .update_consensus(request)
            .await
            .map_err(|_| TransportError::Unreachable(dest.clone()))
    }
}
