use crate::ids::PeerId;
use crate::wal::Term;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// A persistence failure for term/vote state. Fatal to the local replica:
/// continuing with an unpersisted vote or term risks double voting after a
/// crash, which breaks election safety.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist term/vote state: {0}")]
pub struct PersistenceError(#[from] pub io::Error);

/// PersistentVoteState holds the two values the protocol requires to be
/// durable before any RPC response references them: `current_term` and
/// `voted_for` within that term.
///
/// Store methods are CAS-like: they return `Ok(true)` iff state was mutated
/// (and made durable). A replica that loses this state after acknowledging a
/// vote has violated the protocol, hence every mutation is fallible and a
/// failure must halt the replica.
pub trait PersistentVoteState: Send + 'static {
    /// Advances `current_term` to `new_term` iff it is strictly larger,
    /// clearing `voted_for`.
    fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, PersistenceError>;

    /// Records a vote for `vote` in `expected_term` iff that is still the
    /// current term and no vote has been recorded for it.
    fn store_vote_for_term_if_unvoted(
        &mut self,
        expected_term: Term,
        vote: PeerId,
    ) -> Result<bool, PersistenceError>;

    /// Starts an election: increments the term and votes for self in one
    /// durable step. Returns the new term.
    fn increment_term_and_vote_for_self(&mut self) -> Result<Term, PersistenceError>;

    fn current_term(&self) -> Term;
    fn voted_for_current_term(&self) -> (Term, Option<PeerId>);
}

#[derive(Serialize, Deserialize)]
struct VoteRecord {
    current_term: Term,
    voted_for: Option<PeerId>,
}

const VOTE_STATE_FILE: &str = "vote_state";
const VOTE_STATE_TEMP_FILE: &str = "vote_state.tmp";

/// File-backed vote state: a single JSON record, rewritten atomically
/// (temp file + fsync + rename) on every mutation. The persisted record is
/// the sole source of truth on recovery.
pub struct DurableVoteState {
    dir: PathBuf,
    my_id: PeerId,
    current_term: Term,
    voted_for: Option<PeerId>,
}

impl DurableVoteState {
    pub fn open(dir: impl Into<PathBuf>, my_id: PeerId) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(PersistenceError)?;

        let path = dir.join(VOTE_STATE_FILE);
        let (current_term, voted_for) = if path.exists() {
            let mut contents = String::new();
            File::open(&path)
                .and_then(|mut f| f.read_to_string(&mut contents))
                .map_err(PersistenceError)?;
            let record: VoteRecord = serde_json::from_str(&contents)
                .map_err(|e| PersistenceError(io::Error::new(io::ErrorKind::InvalidData, e)))?;
            (record.current_term, record.voted_for)
        } else {
            (Term::new(0), None)
        };

        Ok(DurableVoteState {
            dir,
            my_id,
            current_term,
            voted_for,
        })
    }

    /// Writes the record durably before the in-memory fields change, so a
    /// failed write leaves memory and disk agreeing on the old state.
    fn persist(
        &self,
        current_term: Term,
        voted_for: &Option<PeerId>,
    ) -> Result<(), PersistenceError> {
        let record = VoteRecord {
            current_term,
            voted_for: voted_for.clone(),
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| PersistenceError(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let temp_path = self.dir.join(VOTE_STATE_TEMP_FILE);
        let mut temp = File::create(&temp_path).map_err(PersistenceError)?;
        temp.write_all(&json).map_err(PersistenceError)?;
        temp.sync_all().map_err(PersistenceError)?;
        fs::rename(&temp_path, self.dir.join(VOTE_STATE_FILE)).map_err(PersistenceError)?;
        // The rename is not durable until the directory entry itself is
        // synced.
        File::open(&self.dir)
            .and_then(|d| d.sync_all())
            .map_err(PersistenceError)?;
        Ok(())
    }
}

impl PersistentVoteState for DurableVoteState {
    fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, PersistenceError> {
        if new_term <= self.current_term {
            return Ok(false);
        }
        self.persist(new_term, &None)?;
        self.current_term = new_term;
        self.voted_for = None;
        Ok(true)
    }

    fn store_vote_for_term_if_unvoted(
        &mut self,
        expected_term: Term,
        vote: PeerId,
    ) -> Result<bool, PersistenceError> {
        if expected_term != self.current_term || self.voted_for.is_some() {
            return Ok(false);
        }
        let voted_for = Some(vote);
        self.persist(self.current_term, &voted_for)?;
        self.voted_for = voted_for;
        Ok(true)
    }

    fn increment_term_and_vote_for_self(&mut self) -> Result<Term, PersistenceError> {
        let new_term = self.current_term.next();
        let voted_for = Some(self.my_id.clone());
        self.persist(new_term, &voted_for)?;
        self.current_term = new_term;
        self.voted_for = voted_for;
        Ok(new_term)
    }

    fn current_term(&self) -> Term {
        self.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<PeerId>) {
        (self.current_term, self.voted_for.clone())
    }
}

/// In-memory vote state for unit tests that exercise the consensus algorithm
/// without touching disk.
pub struct VolatileVoteState {
    my_id: PeerId,
    current_term: Term,
    voted_for: Option<PeerId>,
}

impl VolatileVoteState {
    pub fn new(my_id: PeerId) -> Self {
        VolatileVoteState {
            my_id,
            current_term: Term::new(0),
            voted_for: None,
        }
    }
}

impl PersistentVoteState for VolatileVoteState {
    fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, PersistenceError> {
        if new_term <= self.current_term {
            return Ok(false);
        }
        self.current_term = new_term;
        self.voted_for = None;
        Ok(true)
    }

    fn store_vote_for_term_if_unvoted(
        &mut self,
        expected_term: Term,
        vote: PeerId,
    ) -> Result<bool, PersistenceError> {
        if expected_term != self.current_term || self.voted_for.is_some() {
            return Ok(false);
        }
        self.voted_for = Some(vote);
        Ok(true)
    }

    fn increment_term_and_vote_for_self(&mut self) -> Result<Term, PersistenceError> {
        self.current_term = self.current_term.next();
        self.voted_for = Some(self.my_id.clone());
        Ok(self.current_term)
    }

    fn current_term(&self) -> Term {
        self.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<PeerId>) {
        (self.current_term, self.voted_for.clone())
    }
}
