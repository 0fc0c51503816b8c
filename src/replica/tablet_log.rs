use crate::api::TabletDataLayer;
use crate::wal::{Log, LogEntry, LogError, OpId, ReplicatedOperation, Term};
use slog::warn;

/// TabletLog wraps the durable log with the volatile cursors consensus needs:
/// the commit index and the apply cursor. It owns the two safety checks that
/// sit between the consensus algorithm and storage: committed entries are
/// never truncated, and entries are handed to the data layer in log order,
/// only once covered by the commit index.
pub(crate) struct TabletLog<L: Log, M: TabletDataLayer> {
    logger: slog::Logger,
    log: L,
    data_layer: M,

    /// Highest log index known replicated on a majority of voters. Volatile;
    /// re-derived after restart by the normal commit rules, starting just
    /// below the earliest retained entry.
    commit_index: u64,
    /// Highest log index handed to the data layer. Never exceeds
    /// `commit_index`.
    last_applied: u64,
}

impl<L: Log, M: TabletDataLayer> TabletLog<L, M> {
    pub(crate) fn new(logger: slog::Logger, log: L, data_layer: M) -> Self {
        // Entries below the retained prefix were committed and applied before
        // they became GC-eligible.
        let floor = log.first_retained_index() - 1;
        TabletLog {
            logger,
            log,
            data_layer,
            commit_index: floor,
            last_applied: floor,
        }
    }

    pub(crate) fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub(crate) fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub(crate) fn last_op_id(&self) -> OpId {
        self.log.last_op_id()
    }

    pub(crate) fn first_retained_index(&self) -> u64 {
        self.log.first_retained_index()
    }

    pub(crate) fn entry(&self, index: u64) -> Result<Option<LogEntry>, LogError> {
        self.log.entry(index)
    }

    pub(crate) fn read_range(
        &self,
        start_index: u64,
        end_index: u64,
    ) -> Result<Vec<LogEntry>, LogError> {
        self.log.read_range(start_index, end_index)
    }

    /// Leader path: assigns the next index in the current term and appends.
    pub(crate) fn append_as_leader(
        &mut self,
        term: Term,
        op: ReplicatedOperation,
    ) -> Result<OpId, LogError> {
        let op_id = OpId {
            term,
            index: self.log.last_op_id().index + 1,
        };
        self.log.append(vec![LogEntry {
            op_id,
            op,
        }])?;
        Ok(op_id)
    }

    /// Follower path: appends a batch already sequenced by the leader.
    pub(crate) fn append_from_leader(&mut self, entries: Vec<LogEntry>) -> Result<(), LogError> {
        self.log.append(entries)
    }

    /// Discards the divergent suffix starting at `index`. Refuses to touch
    /// committed entries; that would mean two leaders committed conflicting
    /// entries at the same index, and the replica must halt rather than
    /// proceed.
    pub(crate) fn truncate_from(&mut self, index: u64) -> Result<(), LogError> {
        if index <= self.commit_index {
            return Err(LogError::TruncateBelowCommitted {
                commit_index: self.commit_index,
                requested: index,
            });
        }
        self.log.truncate_from(index)
    }

    /// Follower path: adopt the leader's commit index, capped at our own log
    /// tail. Returns true if the commit index moved.
    pub(crate) fn ratchet_commit_index(&mut self, leader_commit_index: u64) -> bool {
        let new_commit_index = leader_commit_index.min(self.log.last_op_id().index);
        if new_commit_index > self.commit_index {
            self.commit_index = new_commit_index;
            true
        } else {
            false
        }
    }

    /// Leader path: advance the commit index to `candidate_index` only if the
    /// entry there belongs to `current_term`. Entries from earlier terms
    /// become committed transitively, never directly, which prevents a
    /// re-elected leader from committing an entry a competing leader may have
    /// overwritten elsewhere.
    pub(crate) fn try_advance_commit_index(
        &mut self,
        candidate_index: u64,
        current_term: Term,
    ) -> Result<bool, LogError> {
        if candidate_index <= self.commit_index {
            return Ok(false);
        }
        let entry = self.log.entry(candidate_index)?.ok_or(LogError::IndexNotFound {
            index: candidate_index,
            earliest: self.log.first_retained_index(),
            last: self.log.last_op_id().index,
        })?;
        if entry.op_id.term != current_term {
            return Ok(false);
        }
        self.commit_index = candidate_index;
        Ok(true)
    }

    /// Reclaims log entries up to `index`, capped at the apply cursor so GC
    /// never reaches past what the data layer has consumed. Returns the new
    /// first retained index.
    pub(crate) fn gc_up_to(&mut self, index: u64) -> Result<u64, LogError> {
        self.log.gc_up_to(index.min(self.last_applied))?;
        Ok(self.log.first_retained_index())
    }

    /// Hands newly committed entries to the data layer, in log order. A
    /// retryable apply failure leaves the cursor in place; the next pass
    /// retries the same entry.
    pub(crate) fn apply_committed_entries(&mut self) -> Result<(), LogError> {
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let entry = self.log.entry(index)?.ok_or(LogError::IndexNotFound {
                index,
                earliest: self.log.first_retained_index(),
                last: self.log.last_op_id().index,
            })?;
            if let Err(e) = self.data_layer.apply(&entry) {
                warn!(
                    self.logger,
                    "Apply of committed entry {:?} failed, will retry: {}", entry.op_id, e
                );
                break;
            }
            self.last_applied = index;
        }
        Ok(())
    }
}
