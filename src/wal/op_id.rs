use serde::{Deserialize, Serialize};
use std::fmt;

/// Term is a monotonically increasing epoch number used to detect stale
/// leaders and candidates.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Term(u64);

impl Term {
    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Term {
        Term(self.0 + 1)
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OpId identifies a single entry in a tablet's replicated log: the leadership
/// term in which the entry was created and its position in the log.
///
/// OpIds are totally ordered by term, then index. Within a single replica's
/// log, indexes are strictly increasing and terms are non-decreasing.
///
/// Field order matters: the derived `Ord` compares `term` before `index`.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Serialize, Deserialize)]
pub struct OpId {
    pub term: Term,
    pub index: u64,
}

impl OpId {
    /// The zero OpId. No real log entry ever carries it; it marks "nothing
    /// written yet" and the predecessor of the first entry.
    pub const MIN: OpId = OpId {
        term: Term(0),
        index: 0,
    };

    pub fn new(term: Term, index: u64) -> Self {
        OpId { term, index }
    }

    pub fn is_min(&self) -> bool {
        *self == OpId::MIN
    }
}

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term.0, self.index)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term.0, self.index)
    }
}
