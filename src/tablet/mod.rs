use crate::api::TabletHandle;
use crate::ids::TabletId;
use crate::wal::OpId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

/// Registry of the tablet replicas hosted by this process. One server hosts
/// many tablets; each has its own log, quorum, and consensus state, and they
/// share nothing but this directory.
pub struct TabletManager {
    tablets: Mutex<HashMap<TabletId, TabletHandle>>,
}

impl TabletManager {
    pub fn new() -> Self {
        TabletManager {
            tablets: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a replica. Returns false (and keeps the existing entry) if
    /// the tablet is already registered.
    pub fn register(&self, handle: TabletHandle) -> bool {
        let mut tablets = self.tablets.lock().expect("tablet registry lock poisoned");
        match tablets.entry(handle.tablet_id().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
                true
            }
        }
    }

    pub fn remove(&self, tablet_id: &TabletId) -> Option<TabletHandle> {
        self.tablets
            .lock()
            .expect("tablet registry lock poisoned")
            .remove(tablet_id)
    }

    pub fn handle(&self, tablet_id: &TabletId) -> Option<TabletHandle> {
        self.tablets
            .lock()
            .expect("tablet registry lock poisoned")
            .get(tablet_id)
            .cloned()
    }

    pub fn tablet_ids(&self) -> Vec<TabletId> {
        self.tablets
            .lock()
            .expect("tablet registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// The last logged OpId of every hosted tablet, in one pass. Tablets
    /// whose replica has shut down are omitted.
    pub async fn last_op_ids(&self) -> HashMap<TabletId, OpId> {
        // Snapshot the handles first; the registry lock is never held across
        // an await.
        let handles: Vec<TabletHandle> = self
            .tablets
            .lock()
            .expect("tablet registry lock poisoned")
            .values()
            .cloned()
            .collect();

        let mut result = HashMap::with_capacity(handles.len());
        for handle in handles {
            if let Ok(op_id) = handle.last_op_id().await {
                result.insert(handle.tablet_id().clone(), op_id);
            }
        }
        result
    }
}

impl Default for TabletManager {
    fn default() -> Self {
        Self::new()
    }
}
