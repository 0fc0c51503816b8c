use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning knobs for a tablet replica. All fields are optional; `None` means
/// the built-in default. Invalid combinations are rejected when the replica
/// is started, not silently corrected.
#[derive(Clone, Debug, Default)]
pub struct ConsensusOptions {
    /// Cadence of the leader's per-peer replication requests.
    pub leader_heartbeat_duration: Option<Duration>,
    /// Bounds of the randomized interval a follower waits without hearing
    /// from a leader before starting an election.
    pub follower_min_timeout: Option<Duration>,
    pub follower_max_timeout: Option<Duration>,
    /// How long an outbound peer request may remain unanswered before it is
    /// treated as failed.
    pub rpc_timeout: Option<Duration>,
    /// Upper bound on log entries carried by a single replication request.
    pub max_entries_per_request: Option<usize>,
    /// Depth of the replica's event queue.
    pub event_queue_size: Option<usize>,
}

const DEFAULT_LEADER_HEARTBEAT: Duration = Duration::from_millis(100);
const DEFAULT_FOLLOWER_MIN_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_FOLLOWER_MAX_TIMEOUT: Duration = Duration::from_millis(1500);
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_ENTRIES_PER_REQUEST: usize = 64;
const DEFAULT_EVENT_QUEUE_SIZE: usize = 256;

#[derive(Clone, Debug)]
pub(crate) struct ValidatedOptions {
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
    pub(crate) rpc_timeout: Duration,
    pub(crate) max_entries_per_request: usize,
    pub(crate) event_queue_size: usize,
}

impl TryFrom<ConsensusOptions> for ValidatedOptions {
    type Error = String;

    fn try_from(options: ConsensusOptions) -> Result<Self, Self::Error> {
        let validated = ValidatedOptions {
            leader_heartbeat_duration: options
                .leader_heartbeat_duration
                .unwrap_or(DEFAULT_LEADER_HEARTBEAT),
            follower_min_timeout: options
                .follower_min_timeout
                .unwrap_or(DEFAULT_FOLLOWER_MIN_TIMEOUT),
            follower_max_timeout: options
                .follower_max_timeout
                .unwrap_or(DEFAULT_FOLLOWER_MAX_TIMEOUT),
            rpc_timeout: options.rpc_timeout.unwrap_or(DEFAULT_RPC_TIMEOUT),
            max_entries_per_request: options
                .max_entries_per_request
                .unwrap_or(DEFAULT_MAX_ENTRIES_PER_REQUEST),
            event_queue_size: options.event_queue_size.unwrap_or(DEFAULT_EVENT_QUEUE_SIZE),
        };

        if validated.follower_min_timeout > validated.follower_max_timeout {
            return Err(format!(
                "follower_min_timeout ({:?}) must not exceed follower_max_timeout ({:?})",
                validated.follower_min_timeout, validated.follower_max_timeout
            ));
        }
        if validated.leader_heartbeat_duration >= validated.follower_min_timeout {
            return Err(format!(
                "leader_heartbeat_duration ({:?}) must be shorter than follower_min_timeout ({:?})",
                validated.leader_heartbeat_duration, validated.follower_min_timeout
            ));
        }
        if validated.max_entries_per_request == 0 {
            return Err("max_entries_per_request must be at least 1".to_string());
        }
        if validated.event_queue_size == 0 {
            return Err("event_queue_size must be at least 1".to_string());
        }

        Ok(validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ValidatedOptions::try_from(ConsensusOptions::default()).unwrap();
    }

    #[test]
    fn heartbeat_must_undercut_follower_timeout() {
        let options = ConsensusOptions {
            leader_heartbeat_duration: Some(Duration::from_millis(500)),
            follower_min_timeout: Some(Duration::from_millis(500)),
            ..ConsensusOptions::default()
        };
        assert!(ValidatedOptions::try_from(options).is_err());
    }

    #[test]
    fn inverted_timeout_range_rejected() {
        let options = ConsensusOptions {
            follower_min_timeout: Some(Duration::from_millis(900)),
            follower_max_timeout: Some(Duration::from_millis(500)),
            ..ConsensusOptions::default()
        };
        assert!(ValidatedOptions::try_from(options).is_err());
    }
}
