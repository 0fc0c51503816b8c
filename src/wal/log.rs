use crate::quorum::QuorumConfig;
use crate::wal::op_id::OpId;
use serde::{Deserialize, Serialize};
use std::io;

/// The payload of a replicated log entry. Configuration changes travel through
/// the same log as data writes, so they inherit the log's ordering and
/// durability guarantees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReplicatedOperation {
    /// An opaque batch of row mutations, owned by the tablet data layer.
    Write { payload: Vec<u8> },
    /// Replaces the quorum membership once this entry commits.
    ConfigChange { new_config: QuorumConfig },
    /// Appended by a newly elected leader to establish commit-ability of its
    /// term. Entries from prior terms can only be committed transitively,
    /// through an entry of the leader's own term reaching a majority.
    NoOp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub op_id: OpId,
    pub op: ReplicatedOperation,
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("out of order append: expected index {expected}, got {got:?}")]
    OutOfOrderAppend { expected: u64, got: OpId },

    /// A safety-invariant breach: committed entries must never be discarded.
    /// Fatal to the replica that triggers it.
    #[error("truncate at index {requested} would discard committed entries (commit index {commit_index})")]
    TruncateBelowCommitted { commit_index: u64, requested: u64 },

    #[error("index {index} is outside the retained log range [{earliest}, {last}]")]
    IndexNotFound { index: u64, earliest: u64, last: u64 },

    #[error("log storage failure: {0}")]
    Io(#[from] io::Error),
}

/// Log is the append-only, durable sequence of operations backing one tablet
/// replica. Indexes start at 1; index 0 never holds an entry.
///
/// Implementations must guarantee that a successful `append` return implies
/// the entries survive a crash (fsync-equivalent semantics), and that every
/// index between `first_retained_index` and `last_op_id().index` is present,
/// with no gaps.
pub trait Log: Send + 'static {
    /// Appends `entries`, which must carry strictly increasing contiguous
    /// indexes continuing immediately after the current last index, with
    /// non-decreasing terms. Durable before returning `Ok`.
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<(), LogError>;

    /// Discards all entries at or after `index`. Used when a follower's log
    /// diverges from a new leader's. The commit-index guard lives one layer
    /// up, in `TabletLog`; storage only refuses indexes below the retained
    /// prefix.
    fn truncate_from(&mut self, index: u64) -> Result<(), LogError>;

    /// Reads the entry at `index`. `Ok(None)` past the tail; `IndexNotFound`
    /// below the earliest retained entry.
    fn entry(&self, index: u64) -> Result<Option<LogEntry>, LogError>;

    /// Reads entries in `[start_index, end_index)`. Fails with `IndexNotFound`
    /// if the range reaches below the earliest retained entry or past the
    /// last index.
    fn read_range(&self, start_index: u64, end_index: u64) -> Result<Vec<LogEntry>, LogError>;

    /// OpId of the last entry ever appended and not truncated: the tail
    /// entry's OpId, or for a log whose retained suffix is empty, the GC
    /// anchor (`OpId::MIN` if nothing was ever GC'd either).
    fn last_op_id(&self) -> OpId;

    /// Earliest index still present. 1 for a log that has never been GC'd,
    /// even while empty.
    fn first_retained_index(&self) -> u64;

    /// Garbage-collects entries at or below `index`. Callers only GC the
    /// committed-and-applied prefix; on a live replica that is
    /// `TabletHandle::gc_log`, which caps the index at the apply cursor.
    /// Implementations must remember the OpId of the last GC'd entry so
    /// `last_op_id` stays answerable if truncation later empties the log.
    fn gc_up_to(&mut self, index: u64) -> Result<(), LogError>;
}

/// Shared append validation for `Log` implementations: contiguous indexes
/// continuing the tail, non-decreasing terms.
pub(super) fn validate_append(last: OpId, entries: &[LogEntry]) -> Result<(), LogError> {
    let mut expected_index = last.index + 1;
    let mut prev_term = last.term;
    for entry in entries {
        if entry.op_id.index != expected_index || entry.op_id.term < prev_term {
            return Err(LogError::OutOfOrderAppend {
                expected: expected_index,
                got: entry.op_id,
            });
        }
        expected_index += 1;
        prev_term = entry.op_id.term;
    }
    Ok(())
}
