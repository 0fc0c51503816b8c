use crate::actor::{ActorClient, ReplicaActor};
use crate::api::client::TabletHandle;
use crate::api::data_layer::TabletDataLayer;
use crate::api::options::{ConsensusOptions, ValidatedOptions};
use crate::ids::{PeerId, TabletId};
use crate::quorum::QuorumConfig;
use crate::replica::{PersistentVoteState, Replica, ReplicaConfig};
use crate::transport::PeerTransport;
use crate::wal::{Log, LogError, ReplicatedOperation};
use slog::{info, o};
use std::convert::TryFrom;
use std::sync::Arc;

/// Everything needed to bring one tablet replica to life.
pub struct TabletReplicaConfig<L, S, M> {
    pub logger: slog::Logger,
    pub tablet_id: TabletId,
    pub my_peer_id: PeerId,
    /// The configuration the tablet was created with. Superseded by any
    /// CONFIG_CHANGE entry found in the log during recovery.
    pub initial_config: QuorumConfig,
    pub log: L,
    pub vote_state: S,
    pub data_layer: M,
    pub transport: Arc<dyn PeerTransport>,
    pub options: ConsensusOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaCreationError {
    #[error("peer {0} is not a member of the replica's configuration")]
    MeNotInConfig(PeerId),

    #[error("illegal options: {0}")]
    IllegalOptions(String),

    #[error("failed to read the log during recovery: {0}")]
    LogRecovery(#[from] LogError),
}

/// Creates a tablet replica and spawns its event loop onto the current tokio
/// runtime. The replica starts as a follower; it will elect itself in due
/// course if no leader makes contact.
pub fn start_tablet_replica<L, S, M>(
    config: TabletReplicaConfig<L, S, M>,
) -> Result<TabletHandle, ReplicaCreationError>
where
    L: Log,
    S: PersistentVoteState,
    M: TabletDataLayer,
{
    let options = ValidatedOptions::try_from(config.options)
        .map_err(ReplicaCreationError::IllegalOptions)?;

    let committed_config = recover_config(&config.log, config.initial_config)?;
    if !committed_config.contains(&config.my_peer_id) {
        return Err(ReplicaCreationError::MeNotInConfig(config.my_peer_id));
    }

    let logger = config.logger.new(o!(
        "tablet" => config.tablet_id.to_string(),
        "peer" => config.my_peer_id.to_string(),
    ));
    info!(
        logger,
        "Starting tablet replica with config {:?}", committed_config
    );

    let (actor_client, event_receiver) = ActorClient::new(options.event_queue_size);
    let replica = Replica::new(ReplicaConfig {
        logger: logger.clone(),
        tablet_id: config.tablet_id.clone(),
        my_peer_id: config.my_peer_id,
        committed_config,
        log: config.log,
        vote_state: config.vote_state,
        data_layer: config.data_layer,
        transport: config.transport,
        actor_client: actor_client.clone(),
        leader_heartbeat_duration: options.leader_heartbeat_duration,
        follower_min_timeout: options.follower_min_timeout,
        follower_max_timeout: options.follower_max_timeout,
        rpc_timeout: options.rpc_timeout,
        max_entries_per_request: options.max_entries_per_request,
    });
    let actor = ReplicaActor::new(logger, event_receiver, replica);
    tokio::task::spawn(actor.run_event_loop());

    Ok(TabletHandle::new(config.tablet_id, actor_client))
}

/// The most recent configuration recorded in the log, whether or not the
/// entry carrying it committed before the crash. Adopting it matches what the
/// rest of the quorum will converge on: if the entry survives reconciliation
/// it commits, and if it doesn't the leader's log replaces it here too.
fn recover_config<L: Log>(
    log: &L,
    creation_config: QuorumConfig,
) -> Result<QuorumConfig, LogError> {
    let first_retained = log.first_retained_index();
    let mut index = log.last_op_id().index;
    while index >= first_retained {
        if let Some(entry) = log.entry(index)? {
            if let ReplicatedOperation::ConfigChange { new_config } = entry.op {
                return Ok(new_config);
            }
        }
        index -= 1;
    }
    Ok(creation_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum::MemberType;
    use crate::wal::{InMemoryLog, LogEntry, OpId, Term};

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    #[test]
    fn recovery_prefers_latest_logged_config() {
        let creation = QuorumConfig::initial(vec![peer("a"), peer("b"), peer("c")]);
        let with_d = creation
            .with_member_added(peer("d"), MemberType::Voter, 2)
            .unwrap();

        let mut log = InMemoryLog::new();
        log.append(vec![
            LogEntry {
                op_id: OpId::new(Term::new(1), 1),
                op: ReplicatedOperation::NoOp,
            },
            LogEntry {
                op_id: OpId::new(Term::new(1), 2),
                op: ReplicatedOperation::ConfigChange {
                    new_config: with_d.clone(),
                },
            },
            LogEntry {
                op_id: OpId::new(Term::new(1), 3),
                op: ReplicatedOperation::Write {
                    payload: b"w".to_vec(),
                },
            },
        ])
        .unwrap();

        let recovered = recover_config(&log, creation).unwrap();
        assert_eq!(recovered, with_d);
    }

    #[test]
    fn recovery_falls_back_to_creation_config() {
        let creation = QuorumConfig::initial(vec![peer("a")]);
        let log = InMemoryLog::new();
        assert_eq!(recover_config(&log, creation.clone()).unwrap(), creation);
    }
}
