use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Statement id allocator shared across sessions
///
/// Every DDL/DML statement is its own atomic unit; the manager hands out its
/// id and tracks which statements are still running.
#[derive(Debug, Clone)]
pub struct StatementManager {
    next_id: Arc<AtomicU64>,
    active: Arc<RwLock<HashSet<u64>>>,
}

impl StatementManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            active: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Allocate an id and register the statement as running
    pub fn begin(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.active.write().insert(id);
        id
    }

    /// Unregister a committed or aborted statement
    pub fn finish(&self, id: u64) {
        self.active.write().remove(&id);
    }

    #[must_use]
    pub fn is_active(&self, id: u64) -> bool {
        self.active.read().contains(&id)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }
}

impl Default for StatementManager {
    fn default() -> Self {
        Self::new()
    }
}
