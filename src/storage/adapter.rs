/// Storage adapter - the boundary with the row-storage collaborator
///
/// The core never touches pages or files. Everything it needs from storage
/// goes through [`TableStore`]; implementations pick their own layout and
/// durability story.
use crate::types::{Column, DatabaseError, Row, RowId, TableHandle, Value};

/// Lazy, finite sequence of stored rows. Restartable only by calling
/// [`TableStore::scan`] again.
pub type RowScan = Box<dyn Iterator<Item = (RowId, Row)> + Send>;

/// Trait for row storage operations
///
/// Methods take `&self`: implementations are shared between statements and
/// synchronize internally. The core guarantees a single writer per table.
pub trait TableStore: Send + Sync {
    /// Allocate storage for a new table
    fn create_table(&self, columns: &[Column]) -> Result<TableHandle, DatabaseError>;

    /// Release a table's storage
    fn drop_table(&self, handle: TableHandle) -> Result<(), DatabaseError>;

    /// Scan every row in row-id order
    fn scan(&self, handle: TableHandle) -> Result<RowScan, DatabaseError>;

    /// Fetch one row by id
    fn get(&self, handle: TableHandle, id: RowId) -> Result<Option<Row>, DatabaseError>;

    /// Point lookup: rows whose `column` equals `key`
    fn lookup(
        &self,
        handle: TableHandle,
        column: usize,
        key: &Value,
    ) -> Result<Vec<(RowId, Row)>, DatabaseError>;

    /// Append rows, returning their ids in input order
    fn insert(&self, handle: TableHandle, rows: Vec<Row>) -> Result<Vec<RowId>, DatabaseError>;

    /// Remove rows by id, returning how many existed
    fn delete(&self, handle: TableHandle, ids: &[RowId]) -> Result<usize, DatabaseError>;

    /// Replace the values of one row
    fn update(&self, handle: TableHandle, id: RowId, values: Vec<Value>) -> Result<(), DatabaseError>;

    /// Remove every row and reset the row-id counter
    fn truncate(&self, handle: TableHandle) -> Result<(), DatabaseError>;

    /// Put rows back under their original ids (statement rollback)
    fn restore(&self, handle: TableHandle, rows: Vec<(RowId, Row)>) -> Result<(), DatabaseError>;

    /// Number of stored rows, O(1)
    fn row_count(&self, handle: TableHandle) -> Result<usize, DatabaseError>;
}
