use crate::wal::log::{validate_append, Log, LogEntry, LogError};
use crate::wal::op_id::OpId;

/// In-memory `Log` for unit tests and in-process clusters. Upholds the same
/// ordering invariants as the durable implementation, minus the durability.
pub struct InMemoryLog {
    entries: Vec<LogEntry>,
    first_retained: u64,
    /// OpId of the last GC'd entry (the one at `first_retained - 1`), so the
    /// log tail stays answerable even if truncation later empties the
    /// retained suffix. `OpId::MIN` until the first GC.
    gc_anchor: OpId,
}

impl InMemoryLog {
    pub fn new() -> Self {
        InMemoryLog {
            entries: Vec::new(),
            first_retained: 1,
            gc_anchor: OpId::MIN,
        }
    }

    fn vec_index(&self, index: u64) -> usize {
        (index - self.first_retained) as usize
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for InMemoryLog {
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<(), LogError> {
        validate_append(self.last_op_id(), &entries)?;
        self.entries.extend(entries);
        Ok(())
    }

    fn truncate_from(&mut self, index: u64) -> Result<(), LogError> {
        if index < self.first_retained {
            return Err(LogError::IndexNotFound {
                index,
                earliest: self.first_retained,
                last: self.last_op_id().index,
            });
        }
        let keep = self.vec_index(index);
        self.entries.truncate(keep);
        Ok(())
    }

    fn entry(&self, index: u64) -> Result<Option<LogEntry>, LogError> {
        if index < self.first_retained {
            return Err(LogError::IndexNotFound {
                index,
                earliest: self.first_retained,
                last: self.last_op_id().index,
            });
        }
        Ok(self.entries.get(self.vec_index(index)).cloned())
    }

    fn read_range(&self, start_index: u64, end_index: u64) -> Result<Vec<LogEntry>, LogError> {
        let last = self.last_op_id().index;
        if start_index < self.first_retained || end_index > last + 1 {
            return Err(LogError::IndexNotFound {
                index: start_index,
                earliest: self.first_retained,
                last,
            });
        }
        if start_index >= end_index {
            return Ok(Vec::new());
        }
        let start = self.vec_index(start_index);
        let end = self.vec_index(end_index);
        Ok(self.entries[start..end].to_vec())
    }

    fn last_op_id(&self) -> OpId {
        match self.entries.last() {
            Some(entry) => entry.op_id,
            // Truncation may empty the retained suffix of a GC'd log; the
            // anchor preserves the tail OpId.
            None => self.gc_anchor,
        }
    }

    fn first_retained_index(&self) -> u64 {
        self.first_retained
    }

    fn gc_up_to(&mut self, index: u64) -> Result<(), LogError> {
        // Keep at least the last entry so the tail's full OpId stays readable.
        let limit = self.last_op_id().index.saturating_sub(1);
        let gc_to = index.min(limit);
        if gc_to < self.first_retained {
            return Ok(());
        }
        let drop_count = self.vec_index(gc_to) + 1;
        self.gc_anchor = self.entries[drop_count - 1].op_id;
        self.entries.drain(..drop_count);
        self.first_retained = gc_to + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::op_id::Term;
    use crate::wal::ReplicatedOperation;

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry {
            op_id: OpId::new(Term::new(term), index),
            op: ReplicatedOperation::NoOp,
        }
    }

    #[test]
    fn append_and_read_back() {
        let mut log = InMemoryLog::new();
        log.append(vec![entry(1, 1), entry(1, 2), entry(2, 3)]).unwrap();

        assert_eq!(log.last_op_id(), OpId::new(Term::new(2), 3));
        assert_eq!(log.entry(2).unwrap().unwrap().op_id.index, 2);
        assert!(log.entry(4).unwrap().is_none());

        let range = log.read_range(1, 3).unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[1].op_id.index, 2);
    }

    #[test]
    fn rejects_gap_in_append() {
        let mut log = InMemoryLog::new();
        log.append(vec![entry(1, 1)]).unwrap();

        let result = log.append(vec![entry(1, 3)]);
        assert!(matches!(
            result,
            Err(LogError::OutOfOrderAppend { expected: 2, .. })
        ));
    }

    #[test]
    fn rejects_term_regression_in_append() {
        let mut log = InMemoryLog::new();
        log.append(vec![entry(2, 1)]).unwrap();

        let result = log.append(vec![entry(1, 2)]);
        assert!(matches!(result, Err(LogError::OutOfOrderAppend { .. })));
    }

    #[test]
    fn truncate_discards_suffix() {
        let mut log = InMemoryLog::new();
        log.append(vec![entry(1, 1), entry(1, 2), entry(1, 3)]).unwrap();

        log.truncate_from(2).unwrap();
        assert_eq!(log.last_op_id().index, 1);
        assert!(log.entry(2).unwrap().is_none());

        // New entries may then be appended at the truncation point.
        log.append(vec![entry(2, 2)]).unwrap();
        assert_eq!(log.last_op_id(), OpId::new(Term::new(2), 2));
    }

    #[test]
    fn gc_trims_prefix_and_reads_below_fail() {
        let mut log = InMemoryLog::new();
        log.append(vec![entry(1, 1), entry(1, 2), entry(1, 3)]).unwrap();

        log.gc_up_to(2).unwrap();
        assert_eq!(log.first_retained_index(), 3);
        assert_eq!(log.last_op_id().index, 3);

        assert!(matches!(log.entry(1), Err(LogError::IndexNotFound { .. })));
        assert!(matches!(
            log.read_range(1, 4),
            Err(LogError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn gc_never_drops_last_entry() {
        let mut log = InMemoryLog::new();
        log.append(vec![entry(1, 1), entry(1, 2)]).unwrap();

        log.gc_up_to(99).unwrap();
        assert_eq!(log.first_retained_index(), 2);
        assert_eq!(log.last_op_id().index, 2);
    }

    #[test]
    fn truncating_a_gced_log_empty_keeps_tail_answerable() {
        let mut log = InMemoryLog::new();
        log.append(vec![
            entry(1, 1),
            entry(1, 2),
            entry(1, 3),
            entry(1, 4),
            entry(1, 5),
        ])
        .unwrap();
        log.gc_up_to(4).unwrap();
        assert_eq!(log.first_retained_index(), 5);

        // Truncating away the whole retained suffix leaves no entries, but
        // the tail OpId must still reflect the GC'd prefix.
        log.truncate_from(5).unwrap();
        assert_eq!(log.last_op_id(), OpId::new(Term::new(1), 4));

        // A new leader's entry may then be appended right after the anchor.
        log.append(vec![entry(2, 5)]).unwrap();
        assert_eq!(log.last_op_id(), OpId::new(Term::new(2), 5));
    }
}
