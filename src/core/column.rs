use serde::{Deserialize, Serialize};
use super::data_type::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Zero-based position; compacted after DROP COLUMN
    pub ordinal: usize,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            ordinal,
        }
    }
}
