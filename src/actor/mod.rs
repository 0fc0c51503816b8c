//! Single-threaded actor wrapper around the consensus state machine.
//!
//! All mutation of `Replica` happens on one event loop task, so the handlers
//! stay synchronous and lock-free. Everything else in the process talks to
//! the replica through a cloneable `ActorClient` that posts events onto the
//! loop's queue, with a oneshot callback when the caller wants an answer.

use crate::api::TabletDataLayer;
use crate::replica::{
    ChangeConfigError, ConfigChange, ConsensusStatus, GcLogError, LeaderTimerTick,
    PersistentVoteState, Replica, StartElectionError, StartReplicationError,
    StartReplicationInput, StartReplicationOutput, StatusError, StepDownError,
    UpdateReplyFromPeer, VoteReplyFromPeer,
};
use crate::transport::{UpdateRequest, UpdateResponse, VoteRequest, VoteResponse};
use crate::wal::Log;
use slog::info;
use tokio::sync::{mpsc, oneshot};

type Callback<T> = oneshot::Sender<T>;

enum Event {
    // Client-facing operations.
    StartReplication(
        StartReplicationInput,
        Callback<Result<StartReplicationOutput, StartReplicationError>>,
    ),
    ChangeConfig(ConfigChange, Callback<Result<(), ChangeConfigError>>),
    StartElection(Callback<Result<(), StartElectionError>>),
    StepDown(Callback<Result<(), StepDownError>>),
    GcLog(Callback<Result<u64, GcLogError>>),
    Status(Callback<ConsensusStatus>),

    // Inbound peer messages.
    RequestVote(VoteRequest, Callback<VoteResponse>),
    UpdateConsensus(UpdateRequest, Callback<UpdateResponse>),

    // Results of our own outbound peer calls.
    VoteReplyFromPeer(VoteReplyFromPeer),
    UpdateReplyFromPeer(UpdateReplyFromPeer),

    // Timers.
    LeaderTimer(LeaderTimerTick),
    FollowerTimeout,
}

/// The event loop's queue has been closed, meaning the replica is shut down.
#[derive(Debug)]
pub(crate) struct ActorDisconnected;

#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

pub(crate) struct EventReceiver {
    receiver: mpsc::Receiver<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (ActorClient, EventReceiver) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (ActorClient { sender }, EventReceiver { receiver })
    }

    async fn call<T>(
        &self,
        make_event: impl FnOnce(Callback<T>) -> Event,
    ) -> Result<T, ActorDisconnected> {
        let (callback, response) = oneshot::channel();
        self.sender
            .send(make_event(callback))
            .await
            .map_err(|_| ActorDisconnected)?;
        response.await.map_err(|_| ActorDisconnected)
    }

    pub(crate) async fn start_replication(
        &self,
        input: StartReplicationInput,
    ) -> Result<StartReplicationOutput, StartReplicationError> {
        self.call(|cb| Event::StartReplication(input, cb))
            .await
            .map_err(|_| StartReplicationError::ActorExited)?
    }

    pub(crate) async fn change_config(
        &self,
        change: ConfigChange,
    ) -> Result<(), ChangeConfigError> {
        self.call(|cb| Event::ChangeConfig(change, cb))
            .await
            .map_err(|_| ChangeConfigError::ActorExited)?
    }

    pub(crate) async fn start_election(&self) -> Result<(), StartElectionError> {
        self.call(Event::StartElection)
            .await
            .map_err(|_| StartElectionError::ActorExited)?
    }

    pub(crate) async fn step_down(&self) -> Result<(), StepDownError> {
        self.call(Event::StepDown)
            .await
            .map_err(|_| StepDownError::ActorExited)?
    }

    pub(crate) async fn gc_log(&self) -> Result<u64, GcLogError> {
        self.call(Event::GcLog)
            .await
            .map_err(|_| GcLogError::ActorExited)?
    }

    pub(crate) async fn status(&self) -> Result<ConsensusStatus, StatusError> {
        self.call(Event::Status)
            .await
            .map_err(|_| StatusError::ActorExited)
    }

    pub(crate) async fn request_vote(
        &self,
        request: VoteRequest,
    ) -> Result<VoteResponse, ActorDisconnected> {
        self.call(|cb| Event::RequestVote(request, cb)).await
    }

    pub(crate) async fn update_consensus(
        &self,
        request: UpdateRequest,
    ) -> Result<UpdateResponse, ActorDisconnected> {
        self.call(|cb| Event::UpdateConsensus(request, cb)).await
    }

    pub(crate) async fn notify_vote_reply(&self, reply: VoteReplyFromPeer) {
        // A closed queue means the replica is gone; the reply is moot.
        let _ = self.sender.send(Event::VoteReplyFromPeer(reply)).await;
    }

    pub(crate) async fn notify_update_reply(&self, reply: UpdateReplyFromPeer) {
        let _ = self.sender.send(Event::UpdateReplyFromPeer(reply)).await;
    }

    pub(crate) async fn leader_timer(&self, tick: LeaderTimerTick) {
        let _ = self.sender.send(Event::LeaderTimer(tick)).await;
    }

    pub(crate) async fn follower_timeout(&self) {
        let _ = self.sender.send(Event::FollowerTimeout).await;
    }
}

pub(crate) struct ReplicaActor<L: Log, S: PersistentVoteState, M: TabletDataLayer> {
    logger: slog::Logger,
    receiver: EventReceiver,
    replica: Replica<L, S, M>,
}

impl<L: Log, S: PersistentVoteState, M: TabletDataLayer> ReplicaActor<L, S, M> {
    pub(crate) fn new(
        logger: slog::Logger,
        receiver: EventReceiver,
        replica: Replica<L, S, M>,
    ) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
        }
    }

    /// Runs until every `ActorClient` clone (including the timers') is gone.
    pub(crate) async fn run_event_loop(mut self) {
        info!(self.logger, "Starting replica event loop");
        while let Some(event) = self.receiver.receiver.recv().await {
            self.handle_event(event);
        }
        info!(self.logger, "Replica event loop exited");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::StartReplication(input, callback) => {
                // A dropped callback just means the caller gave up waiting.
                let _ = callback.send(self.replica.handle_start_replication(input));
            }
            Event::ChangeConfig(change, callback) => {
                let _ = callback.send(self.replica.handle_change_config(change));
            }
            Event::StartElection(callback) => {
                let _ = callback.send(self.replica.handle_start_election());
            }
            Event::StepDown(callback) => {
                let _ = callback.send(self.replica.handle_step_down());
            }
            Event::GcLog(callback) => {
                let _ = callback.send(self.replica.handle_gc_log());
            }
            Event::Status(callback) => {
                let _ = callback.send(self.replica.handle_status());
            }
            Event::RequestVote(request, callback) => {
                let _ = callback.send(self.replica.handle_request_vote(request));
            }
            Event::UpdateConsensus(request, callback) => {
                let _ = callback.send(self.replica.handle_update_consensus(request));
            }
            Event::VoteReplyFromPeer(reply) => self.replica.handle_vote_reply_from_peer(reply),
            Event::UpdateReplyFromPeer(reply) => self.replica.handle_update_reply_from_peer(reply),
            Event::LeaderTimer(tick) => self.replica.handle_leader_timer(tick),
            Event::FollowerTimeout => self.replica.handle_follower_timeout(),
        }
    }
}
