/// In-memory table store
///
/// Reference implementation of [`TableStore`]: one `BTreeMap<RowId, Row>` per
/// table behind its own lock, so statements on different tables never contend.
/// Point lookups are filtered scans; there are no secondary structures.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use super::adapter::{RowScan, TableStore};
use crate::types::{Column, DatabaseError, Row, RowId, TableHandle, Value};

#[derive(Debug, Default)]
struct MemoryTable {
    rows: BTreeMap<RowId, Row>,
    next_row_id: u64,
}

impl MemoryTable {
    fn allocate_id(&mut self) -> RowId {
        self.next_row_id += 1;
        RowId(self.next_row_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<TableHandle, Arc<RwLock<MemoryTable>>>>,
    next_handle: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, handle: TableHandle) -> Result<Arc<RwLock<MemoryTable>>, DatabaseError> {
        self.tables
            .read()
            .get(&handle)
            .cloned()
            .ok_or_else(|| DatabaseError::Storage(format!("unknown table handle {}", handle.0)))
    }
}

impl TableStore for MemoryStore {
    fn create_table(&self, columns: &[Column]) -> Result<TableHandle, DatabaseError> {
        let handle = TableHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.tables
            .write()
            .insert(handle, Arc::new(RwLock::new(MemoryTable::default())));
        trace!(handle = handle.0, columns = columns.len(), "allocated table storage");
        Ok(handle)
    }

    fn drop_table(&self, handle: TableHandle) -> Result<(), DatabaseError> {
        self.tables
            .write()
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| DatabaseError::Storage(format!("unknown table handle {}", handle.0)))
    }

    fn scan(&self, handle: TableHandle) -> Result<RowScan, DatabaseError> {
        let table = self.table(handle)?;
        let rows: Vec<(RowId, Row)> = table
            .read()
            .rows
            .iter()
            .map(|(id, row)| (*id, row.clone()))
            .collect();
        Ok(Box::new(rows.into_iter()))
    }

    fn get(&self, handle: TableHandle, id: RowId) -> Result<Option<Row>, DatabaseError> {
        Ok(self.table(handle)?.read().rows.get(&id).cloned())
    }

    fn lookup(
        &self,
        handle: TableHandle,
        column: usize,
        key: &Value,
    ) -> Result<Vec<(RowId, Row)>, DatabaseError> {
        if key.is_null() {
            return Ok(Vec::new());
        }
        let wanted = key.key();
        let table = self.table(handle)?;
        let guard = table.read();
        Ok(guard
            .rows
            .iter()
            .filter(|(_, row)| row.values.get(column).is_some_and(|v| v.key() == wanted))
            .map(|(id, row)| (*id, row.clone()))
            .collect())
    }

    fn insert(&self, handle: TableHandle, rows: Vec<Row>) -> Result<Vec<RowId>, DatabaseError> {
        let table = self.table(handle)?;
        let mut guard = table.write();
        let ids = rows
            .into_iter()
            .map(|row| {
                let id = guard.allocate_id();
                guard.rows.insert(id, row);
                id
            })
            .collect();
        Ok(ids)
    }

    fn delete(&self, handle: TableHandle, ids: &[RowId]) -> Result<usize, DatabaseError> {
        let table = self.table(handle)?;
        let mut guard = table.write();
        Ok(ids.iter().filter(|id| guard.rows.remove(*id).is_some()).count())
    }

    fn update(&self, handle: TableHandle, id: RowId, values: Vec<Value>) -> Result<(), DatabaseError> {
        let table = self.table(handle)?;
        let mut guard = table.write();
        let row = guard
            .rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::Storage(format!("row {} not found", id.0)))?;
        row.values = values;
        Ok(())
    }

    fn truncate(&self, handle: TableHandle) -> Result<(), DatabaseError> {
        let table = self.table(handle)?;
        let mut guard = table.write();
        guard.rows.clear();
        guard.next_row_id = 0;
        Ok(())
    }

    fn restore(&self, handle: TableHandle, rows: Vec<(RowId, Row)>) -> Result<(), DatabaseError> {
        let table = self.table(handle)?;
        let mut guard = table.write();
        for (id, row) in rows {
            guard.next_row_id = guard.next_row_id.max(id.0);
            guard.rows.insert(id, row);
        }
        Ok(())
    }

    fn row_count(&self, handle: TableHandle) -> Result<usize, DatabaseError> {
        Ok(self.table(handle)?.read().rows.len())
    }
}
