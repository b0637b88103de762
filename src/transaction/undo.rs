use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::storage::TableStore;
use crate::types::{DatabaseError, QualifiedName, Row, RowId, TableHandle, Value};

/// Lifecycle of one DDL/DML statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Validating,
    Planning,
    Executing,
    Committed,
    Aborted,
}

impl StatementState {
    const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Validating, Self::Planning | Self::Executing | Self::Aborted)
                | (Self::Planning, Self::Executing | Self::Aborted)
                | (Self::Executing, Self::Committed | Self::Aborted)
        )
    }
}

/// One applied change, with what is needed to take it back
#[derive(Debug, Clone)]
pub enum UndoEntry {
    Inserted { handle: TableHandle, ids: Vec<RowId> },
    Deleted { handle: TableHandle, rows: Vec<(RowId, Row)> },
    Updated { handle: TableHandle, id: RowId, old: Vec<Value> },
    Truncated { handle: TableHandle, rows: Vec<(RowId, Row)> },
    /// Table registered by CREATE TABLE AS
    CreatedTable { name: QualifiedName },
}

/// Per-statement transaction: state machine plus undo log
#[derive(Debug)]
pub struct StatementTransaction {
    id: u64,
    state: StatementState,
    undo: Vec<UndoEntry>,
}

impl StatementTransaction {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            state: StatementState::Validating,
            undo: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> StatementState {
        self.state
    }

    pub fn advance(&mut self, next: StatementState) -> Result<(), DatabaseError> {
        if !self.state.can_advance_to(next) {
            return Err(DatabaseError::Storage(format!(
                "statement {} cannot move from {:?} to {:?}",
                self.id, self.state, next
            )));
        }
        debug!(statement = self.id, from = ?self.state, to = ?next, "statement state");
        self.state = next;
        Ok(())
    }

    pub fn record(&mut self, entry: UndoEntry) {
        self.undo.push(entry);
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.undo.is_empty()
    }

    // ---- store operations that log themselves ----

    pub fn insert(
        &mut self,
        store: &dyn TableStore,
        handle: TableHandle,
        rows: Vec<Row>,
    ) -> Result<Vec<RowId>, DatabaseError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids = store.insert(handle, rows)?;
        self.record(UndoEntry::Inserted {
            handle,
            ids: ids.clone(),
        });
        Ok(ids)
    }

    pub fn delete(
        &mut self,
        store: &dyn TableStore,
        handle: TableHandle,
        ids: &[RowId],
    ) -> Result<usize, DatabaseError> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = store.get(handle, *id)? {
                rows.push((*id, row));
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }
        let present: Vec<RowId> = rows.iter().map(|(id, _)| *id).collect();
        let removed = store.delete(handle, &present)?;
        self.record(UndoEntry::Deleted { handle, rows });
        Ok(removed)
    }

    pub fn update(
        &mut self,
        store: &dyn TableStore,
        handle: TableHandle,
        id: RowId,
        values: Vec<Value>,
    ) -> Result<(), DatabaseError> {
        let old = store
            .get(handle, id)?
            .ok_or_else(|| DatabaseError::Storage(format!("row {} vanished during update", id.0)))?;
        store.update(handle, id, values)?;
        self.record(UndoEntry::Updated {
            handle,
            id,
            old: old.values,
        });
        Ok(())
    }

    pub fn truncate(&mut self, store: &dyn TableStore, handle: TableHandle) -> Result<(), DatabaseError> {
        let rows: Vec<(RowId, Row)> = store.scan(handle)?.collect();
        store.truncate(handle)?;
        self.record(UndoEntry::Truncated { handle, rows });
        Ok(())
    }

    pub fn commit(mut self) -> Result<(), DatabaseError> {
        self.advance(StatementState::Committed)?;
        debug!(statement = self.id, changes = self.undo.len(), "statement committed");
        Ok(())
    }

    /// Undo every recorded change, newest first.
    ///
    /// `catalog` is needed only when the log holds a created table.
    pub fn rollback(mut self, store: &dyn TableStore, mut catalog: Option<&mut Catalog>) {
        let entries = std::mem::take(&mut self.undo);
        let count = entries.len();
        for entry in entries.into_iter().rev() {
            let result = match entry {
                UndoEntry::Inserted { handle, ids } => store.delete(handle, &ids).map(|_| ()),
                UndoEntry::Deleted { handle, rows } | UndoEntry::Truncated { handle, rows } => {
                    store.restore(handle, rows)
                }
                UndoEntry::Updated { handle, id, old } => store.update(handle, id, old),
                UndoEntry::CreatedTable { name } => match catalog.as_deref_mut() {
                    Some(catalog) => catalog.drop_table(store, &name),
                    None => Err(DatabaseError::Storage(format!(
                        "no catalog to drop created table '{name}'"
                    ))),
                },
            };
            if let Err(err) = result {
                warn!(statement = self.id, error = %err, "undo step failed");
            }
        }
        self.state = StatementState::Aborted;
        debug!(statement = self.id, undone = count, "statement rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{Column, DataType};

    fn setup() -> (MemoryStore, TableHandle) {
        let store = MemoryStore::new();
        let handle = store
            .create_table(&[Column::new("id", DataType::Integer, false, 0)])
            .unwrap();
        store
            .insert(handle, vec![Row::new(vec![Value::Integer(1)]), Row::new(vec![Value::Integer(2)])])
            .unwrap();
        (store, handle)
    }

    fn contents(store: &MemoryStore, handle: TableHandle) -> Vec<(RowId, Row)> {
        store.scan(handle).unwrap().collect()
    }

    #[test]
    fn test_state_machine_rejects_skips() {
        let mut tx = StatementTransaction::new(1);
        assert!(tx.advance(StatementState::Committed).is_err());
        tx.advance(StatementState::Planning).unwrap();
        tx.advance(StatementState::Executing).unwrap();
        tx.advance(StatementState::Committed).unwrap();
        assert_eq!(tx.state(), StatementState::Committed);
    }

    #[test]
    fn test_rollback_restores_everything() {
        let (store, handle) = setup();
        let before = contents(&store, handle);

        let mut tx = StatementTransaction::new(7);
        tx.insert(&store, handle, vec![Row::new(vec![Value::Integer(3)])]).unwrap();
        tx.update(&store, handle, RowId(1), vec![Value::Integer(10)]).unwrap();
        tx.delete(&store, handle, &[RowId(2)]).unwrap();
        assert!(tx.has_changes());
        tx.rollback(&store, None);

        assert_eq!(contents(&store, handle), before);
    }

    #[test]
    fn test_rollback_of_truncate_keeps_ids() {
        let (store, handle) = setup();
        let before = contents(&store, handle);
        let mut tx = StatementTransaction::new(2);
        tx.truncate(&store, handle).unwrap();
        assert_eq!(store.row_count(handle).unwrap(), 0);
        tx.rollback(&store, None);
        assert_eq!(contents(&store, handle), before);
    }
}
