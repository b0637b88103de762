/// Schema and table intents
///
/// A statement asks for all of its intents at once. They are sorted into the
/// canonical order (every schema before every table, each group by qualified
/// name) and taken one by one, so two statements touching the same pair of
/// tables always queue in the same order.
use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::cancel::CancellationToken;
use crate::types::{DatabaseError, QualifiedName, SchemaName};

/// How long a waiter sleeps before re-checking its cancellation token
const WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Schema(SchemaName),
    Table(QualifiedName),
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema(s) => write!(f, "schema {s}"),
            Self::Table(t) => write!(f, "table {t}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct IntentState {
    readers: usize,
    writer: bool,
}

impl IntentState {
    const fn can_grant(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.writer,
            LockMode::Exclusive => !self.writer && self.readers == 0,
        }
    }

    const fn is_free(&self) -> bool {
        !self.writer && self.readers == 0
    }
}

/// Set of intents a statement wants, built up before acquisition
#[derive(Debug, Default, Clone)]
pub struct LockRequest {
    wanted: Vec<(LockKey, LockMode)>,
}

impl LockRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive intent on a table plus a shared intent on its schema
    #[must_use]
    pub fn write_table(mut self, table: &QualifiedName) -> Self {
        self.wanted.push((LockKey::Schema(table.schema_name()), LockMode::Shared));
        self.wanted.push((LockKey::Table(table.clone()), LockMode::Exclusive));
        self
    }

    #[must_use]
    pub fn read_table(mut self, table: &QualifiedName) -> Self {
        self.wanted.push((LockKey::Schema(table.schema_name()), LockMode::Shared));
        self.wanted.push((LockKey::Table(table.clone()), LockMode::Shared));
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: &SchemaName, mode: LockMode) -> Self {
        self.wanted.push((LockKey::Schema(schema.clone()), mode));
        self
    }

    /// Sorted, deduplicated keys; a key asked for in both modes is exclusive
    fn canonical(mut self) -> Vec<(LockKey, LockMode)> {
        self.wanted
            .sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));
        self.wanted.dedup_by(|next, kept| next.0 == kept.0);
        self.wanted
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wanted.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct LockManager {
    intents: Mutex<HashMap<LockKey, IntentState>>,
    released: Condvar,
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every intent of `request`, blocking until each is free.
    ///
    /// On cancellation the intents taken so far are released before
    /// `CancellationRequested` is returned.
    pub fn acquire(
        &self,
        request: LockRequest,
        cancel: &CancellationToken,
    ) -> Result<LockGuard<'_>, DatabaseError> {
        let mut guard = LockGuard {
            manager: self,
            held: Vec::new(),
        };
        for (key, mode) in request.canonical() {
            self.acquire_one(&key, mode, cancel)?;
            trace!(%key, ?mode, "intent granted");
            guard.held.push((key, mode));
        }
        debug!(count = guard.held.len(), "statement intents acquired");
        Ok(guard)
    }

    fn acquire_one(
        &self,
        key: &LockKey,
        mode: LockMode,
        cancel: &CancellationToken,
    ) -> Result<(), DatabaseError> {
        let mut intents = self.intents.lock();
        loop {
            let state = intents.entry(key.clone()).or_default();
            if state.can_grant(mode) {
                match mode {
                    LockMode::Shared => state.readers += 1,
                    LockMode::Exclusive => state.writer = true,
                }
                return Ok(());
            }
            cancel.check()?;
            trace!(%key, ?mode, "waiting for intent");
            self.released.wait_for(&mut intents, WAIT_SLICE);
        }
    }

    fn release(&self, held: &[(LockKey, LockMode)]) {
        let mut intents = self.intents.lock();
        for (key, mode) in held.iter().rev() {
            if let Some(state) = intents.get_mut(key) {
                match mode {
                    LockMode::Shared => state.readers = state.readers.saturating_sub(1),
                    LockMode::Exclusive => state.writer = false,
                }
                if state.is_free() {
                    intents.remove(key);
                }
            }
        }
        drop(intents);
        self.released.notify_all();
    }

    /// Number of keys with at least one holder
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.intents.lock().len()
    }
}

/// Intents held by one statement; released on drop
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    held: Vec<(LockKey, LockMode)>,
}

impl LockGuard<'_> {
    /// Keys in the order they were taken
    pub fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.held.iter().map(|(key, _)| key)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.held);
    }
}
