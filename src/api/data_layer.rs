use crate::wal::LogEntry;

/// An apply failure reported by the tablet data layer.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// A transient failure (e.g. memory pressure). The entry stays at the
    /// front of the apply queue and is retried on the next apply pass.
    /// Committed entries are never skipped.
    #[error("transient apply failure: {0}")]
    Retryable(String),
}

/// The tablet storage engine's hook into consensus: committed log entries are
/// handed over here, in log order, exactly once per process lifetime (entries
/// below the GC'd prefix are assumed already applied on recovery).
///
/// `apply` is called from the replica event loop and must not block for long.
pub trait TabletDataLayer: Send + 'static {
    fn apply(&mut self, entry: &LogEntry) -> Result<(), ApplyError>;
}

/// A data layer that discards every entry. Useful for replicas that only need
/// consensus-level behavior and for tests.
pub struct NoOpDataLayer;

impl TabletDataLayer for NoOpDataLayer {
    fn apply(&mut self, _entry: &LogEntry) -> Result<(), ApplyError> {
        Ok(())
    }
}
