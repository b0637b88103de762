use serde::{Deserialize, Serialize};
use super::value::Value;

/// Row count and per-column statistics (indexed by column ordinal)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableStatistics {
    pub row_count: u64,
    pub columns: Vec<ColumnStatistics>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct non-NULL values
    pub distinct_count: u64,
    /// Fraction of rows holding NULL, in [0, 1]
    pub null_fraction: f64,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

impl TableStatistics {
    #[must_use]
    pub fn column(&self, ordinal: usize) -> Option<&ColumnStatistics> {
        self.columns.get(ordinal)
    }

    /// Distinct count of a column, never below one
    #[must_use]
    pub fn distinct(&self, ordinal: usize) -> f64 {
        self.column(ordinal)
            .map_or(self.row_count.max(1) as f64, |c| c.distinct_count.max(1) as f64)
    }
}
