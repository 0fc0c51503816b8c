use crate::quorum::config::QuorumConfig;

/// Tracks the committed configuration and the at-most-one in-flight
/// configuration change for a tablet replica.
///
/// Configuration changes ride the replicated log: a CONFIG_CHANGE entry makes
/// the new configuration pending when appended, and authoritative only when
/// that entry commits. Elections always use the committed configuration;
/// replication targets the union of committed and pending members so a
/// just-added server starts catching up before the change commits.
pub(crate) struct QuorumTracker {
    committed: QuorumConfig,
    pending: Option<QuorumConfig>,
}

impl QuorumTracker {
    pub(crate) fn new(committed: QuorumConfig) -> Self {
        QuorumTracker {
            committed,
            pending: None,
        }
    }

    pub(crate) fn committed_config(&self) -> &QuorumConfig {
        &self.committed
    }

    pub(crate) fn pending_config(&self) -> Option<&QuorumConfig> {
        self.pending.as_ref()
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Leader side: stage `config` as the pending change. CAS-style: returns
    /// false (and stores nothing) if a change is already in flight.
    pub(crate) fn begin_change_if_none_pending(&mut self, config: QuorumConfig) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(config);
        true
    }

    /// Follower side: a CONFIG_CHANGE entry was appended from the leader.
    /// Replaces any stale pending config; reconciliation truncated the entry
    /// that carried it before this one could arrive.
    pub(crate) fn observe_appended(&mut self, config: QuorumConfig) {
        self.pending = Some(config);
    }

    /// Promotes the pending configuration once the log entry carrying it is
    /// covered by `commit_index`. Returns the newly committed configuration.
    pub(crate) fn mark_committed_up_to(&mut self, commit_index: u64) -> Option<&QuorumConfig> {
        match &self.pending {
            Some(pending) if pending.opid_index() <= commit_index => {
                self.committed = self.pending.take().expect("pending checked above");
                Some(&self.committed)
            }
            _ => None,
        }
    }

    /// Drops the pending configuration if the entry carrying it was truncated
    /// during log reconciliation.
    pub(crate) fn abort_pending_at_or_after(&mut self, truncate_index: u64) {
        if let Some(pending) = &self.pending {
            if pending.opid_index() >= truncate_index {
                self.pending = None;
            }
        }
    }
}
