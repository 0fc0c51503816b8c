use crate::wal::log::{validate_append, Log, LogEntry, LogError};
use crate::wal::op_id::OpId;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const RECORDS_FILE: &str = "wal.records";
const REWRITE_TEMP_FILE: &str = "wal.records.tmp";
const GC_ANCHOR_FILE: &str = "wal.anchor";
const GC_ANCHOR_TEMP_FILE: &str = "wal.anchor.tmp";

/// Durable `Log` implementation: one JSON record per line in a single
/// append-only file, fsynced before `append` returns. Suffix truncation and
/// prefix GC rewrite the file through a temp-file-then-rename swap.
///
/// The full retained log is also cached in memory; reads never touch disk.
/// Tablet logs are bounded by GC of the applied prefix, so this is acceptable
/// for the log sizes consensus works with.
pub struct FileLog {
    dir: PathBuf,
    file: File,
    entries: Vec<LogEntry>,
    first_retained: u64,
    /// OpId of the last GC'd entry, persisted by `gc_up_to` so the log tail
    /// stays answerable if truncation later empties the retained suffix.
    /// `OpId::MIN` until the first GC.
    gc_anchor: OpId,
}

impl FileLog {
    /// Opens (or creates) the log under `dir`, replaying any existing records.
    /// The persisted records are the sole source of truth on recovery.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let path = dir.join(RECORDS_FILE);

        let entries = if path.exists() {
            Self::replay(&path)?
        } else {
            Vec::new()
        };
        let gc_anchor = Self::read_gc_anchor(&dir)?;
        let first_retained = entries
            .first()
            .map(|e| e.op_id.index)
            .unwrap_or(gc_anchor.index + 1);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(FileLog {
            dir,
            file,
            entries,
            first_retained,
            gc_anchor,
        })
    }

    fn read_gc_anchor(dir: &Path) -> Result<OpId, LogError> {
        let path = dir.join(GC_ANCHOR_FILE);
        if !path.exists() {
            return Ok(OpId::MIN);
        }
        let contents = fs::read_to_string(&path)?;
        let anchor = serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(anchor)
    }

    fn write_gc_anchor(&self, anchor: OpId) -> Result<(), LogError> {
        let temp_path = self.dir.join(GC_ANCHOR_TEMP_FILE);
        let json = serde_json::to_vec(&anchor)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut temp = File::create(&temp_path)?;
        temp.write_all(&json)?;
        temp.sync_all()?;
        fs::rename(&temp_path, self.dir.join(GC_ANCHOR_FILE))?;
        sync_dir(&self.dir)?;
        Ok(())
    }

    fn replay(path: &Path) -> Result<Vec<LogEntry>, LogError> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries: Vec<LogEntry> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_str(&line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if let Some(prev) = entries.last() {
                if entry.op_id.index != prev.op_id.index + 1 || entry.op_id.term < prev.op_id.term {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "log records out of order: {:?} follows {:?}",
                            entry.op_id, prev.op_id
                        ),
                    )
                    .into());
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn vec_index(&self, index: u64) -> usize {
        (index - self.first_retained) as usize
    }

    fn write_records(&mut self, entries: &[LogEntry]) -> Result<(), LogError> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            buf.push(b'\n');
        }
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Rewrites the whole records file from the in-memory cache. Atomic via
    /// temp file + rename, so a crash mid-rewrite leaves the old file intact.
    fn rewrite_all(&mut self) -> Result<(), LogError> {
        let temp_path = self.dir.join(REWRITE_TEMP_FILE);
        let final_path = self.dir.join(RECORDS_FILE);

        let mut temp = File::create(&temp_path)?;
        for entry in &self.entries {
            let mut line = serde_json::to_vec(entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            line.push(b'\n');
            temp.write_all(&line)?;
        }
        temp.sync_all()?;
        fs::rename(&temp_path, &final_path)?;
        sync_dir(&self.dir)?;

        self.file = OpenOptions::new().append(true).open(&final_path)?;
        Ok(())
    }
}

/// The rename of a rewritten file is not durable until the directory entry
/// itself is synced.
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

impl Log for FileLog {
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<(), LogError> {
        validate_append(self.last_op_id(), &entries)?;
        self.write_records(&entries)?;
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
        if index > self.last_op_id().index {
            return Ok(());
        }
        let keep = self.vec_index(index);
        self.entries.truncate(keep);
        self.rewrite_all()
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
            // persisted anchor preserves the tail OpId.
            None => self.gc_anchor,
        }
    }

    fn first_retained_index(&self) -> u64 {
        self.first_retained
    }

    fn gc_up_to(&mut self, index: u64) -> Result<(), LogError> {
        let limit = self.last_op_id().index.saturating_sub(1);
        let gc_to = index.min(limit);
        if gc_to < self.first_retained {
            return Ok(());
        }
        let drop_count = self.vec_index(gc_to) + 1;
        let anchor = self.entries[drop_count - 1].op_id;
        // Anchor first: recovery derives first_retained from the records file
        // whenever it has entries, so an anchor written ahead of a records
        // rewrite that never happened is harmless.
        self.write_gc_anchor(anchor)?;
        self.gc_anchor = anchor;
        self.entries.drain(..drop_count);
        self.first_retained = gc_to + 1;
        self.rewrite_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::op_id::Term;
    use crate::wal::ReplicatedOperation;
    use rand::Rng;

    fn temp_log_dir() -> PathBuf {
        let suffix: u64 = rand::thread_rng().gen();
        std::env::temp_dir().join(format!("tablet-consensus-wal-test-{}", suffix))
    }

    fn entry(term: u64, index: u64) -> LogEntry {
        LogEntry {
            op_id: OpId::new(Term::new(term), index),
            op: ReplicatedOperation::Write {
                payload: format!("row-{}", index).into_bytes(),
            },
        }
    }

    #[test]
    fn survives_reopen() {
        let dir = temp_log_dir();

        {
            let mut log = FileLog::open(&dir).unwrap();
            log.append(vec![entry(1, 1), entry(1, 2), entry(2, 3)]).unwrap();
        }

        let log = FileLog::open(&dir).unwrap();
        assert_eq!(log.last_op_id(), OpId::new(Term::new(2), 3));
        assert_eq!(
            log.entry(2).unwrap().unwrap().op,
            ReplicatedOperation::Write {
                payload: b"row-2".to_vec()
            }
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn truncation_survives_reopen() {
        let dir = temp_log_dir();

        {
            let mut log = FileLog::open(&dir).unwrap();
            log.append(vec![entry(1, 1), entry(1, 2), entry(1, 3)]).unwrap();
            log.truncate_from(2).unwrap();
            log.append(vec![entry(2, 2)]).unwrap();
        }

        let log = FileLog::open(&dir).unwrap();
        assert_eq!(log.last_op_id(), OpId::new(Term::new(2), 2));
        assert_eq!(log.entry(2).unwrap().unwrap().op_id.term, Term::new(2));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn gc_survives_reopen() {
        let dir = temp_log_dir();

        {
            let mut log = FileLog::open(&dir).unwrap();
            log.append(vec![entry(1, 1), entry(1, 2), entry(1, 3)]).unwrap();
            log.gc_up_to(2).unwrap();
        }

        let log = FileLog::open(&dir).unwrap();
        assert_eq!(log.first_retained_index(), 3);
        assert_eq!(log.last_op_id().index, 3);
        assert!(matches!(log.entry(1), Err(LogError::IndexNotFound { .. })));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn truncating_a_gced_log_empty_keeps_tail_answerable() {
        let dir = temp_log_dir();

        {
            let mut log = FileLog::open(&dir).unwrap();
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

            // Leader reconciliation may truncate the whole retained suffix;
            // the tail OpId must survive that, in memory and across restart.
            log.truncate_from(5).unwrap();
            assert_eq!(log.last_op_id(), OpId::new(Term::new(1), 4));
        }

        let mut log = FileLog::open(&dir).unwrap();
        assert_eq!(log.first_retained_index(), 5);
        assert_eq!(log.last_op_id(), OpId::new(Term::new(1), 4));
        log.append(vec![entry(2, 5)]).unwrap();
        assert_eq!(log.last_op_id(), OpId::new(Term::new(2), 5));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_out_of_order_append() {
        let dir = temp_log_dir();

        let mut log = FileLog::open(&dir).unwrap();
        log.append(vec![entry(1, 1)]).unwrap();
        assert!(matches!(
            log.append(vec![entry(1, 3)]),
            Err(LogError::OutOfOrderAppend { expected: 2, .. })
        ));

        fs::remove_dir_all(&dir).unwrap();
    }
}
