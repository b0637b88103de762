use serde::{Deserialize, Serialize};

use super::column::Column;
use super::constraints::{Constraint, ForeignKey};
use super::error::DatabaseError;
use super::name::QualifiedName;
use super::row::TableHandle;
use super::statistics::TableStatistics;

/// Catalog entry of a table. Row data lives behind `handle` in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: QualifiedName,
    pub columns: Vec<Column>,
    pub constraints: Vec<Constraint>,
    pub handle: TableHandle,
    /// Last analyzed statistics, `None` until the first analysis
    pub statistics: Option<TableStatistics>,
    /// Rows inserted, updated or deleted since `statistics` was computed
    pub modifications: u64,
}

impl Table {
    #[must_use]
    pub fn new(
        name: QualifiedName,
        columns: Vec<Column>,
        constraints: Vec<Constraint>,
        handle: TableHandle,
    ) -> Self {
        let mut table = Self {
            name,
            columns,
            constraints,
            handle,
            statistics: None,
            modifications: 0,
        };
        table.renumber_columns();
        table
    }

    #[must_use]
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize, DatabaseError> {
        self.get_column_index(name)
            .ok_or_else(|| DatabaseError::column_not_found(&self.name, name))
    }

    #[must_use]
    pub fn primary_key(&self) -> Option<&[String]> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::PrimaryKey { columns } => Some(columns.as_slice()),
            Constraint::ForeignKey(_) => None,
        })
    }

    /// Ordinals of the primary key columns (empty without a primary key)
    #[must_use]
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key()
            .map(|cols| cols.iter().filter_map(|c| self.get_column_index(c)).collect())
            .unwrap_or_default()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.constraints.iter().filter_map(|c| match c {
            Constraint::ForeignKey(fk) => Some(fk),
            Constraint::PrimaryKey { .. } => None,
        })
    }

    /// Whether the column takes part in any constraint of this table
    #[must_use]
    pub fn is_constrained(&self, column: &str) -> bool {
        self.constraints
            .iter()
            .any(|c| c.columns().iter().any(|name| name == column))
    }

    pub fn renumber_columns(&mut self) {
        for (ordinal, column) in self.columns.iter_mut().enumerate() {
            column.ordinal = ordinal;
        }
    }

    /// Statistics are stale when missing or when more than `ratio` of the
    /// analyzed row count has changed since
    #[must_use]
    pub fn statistics_stale(&self, ratio: f64) -> bool {
        self.statistics.as_ref().is_none_or(|stats| {
            self.modifications as f64 > ratio * stats.row_count.max(1) as f64
        })
    }
}
