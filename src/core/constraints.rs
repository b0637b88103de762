use serde::{Deserialize, Serialize};
use super::name::QualifiedName;

/// Table-level constraint. NOT NULL is carried by [`super::Column::nullable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constraint {
    /// Implies NOT NULL and uniqueness over the listed columns
    PrimaryKey { columns: Vec<String> },
    ForeignKey(ForeignKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub referenced_table: QualifiedName,
    /// Always the referenced table's primary key
    pub referenced_columns: Vec<String>,
}

impl Constraint {
    #[must_use]
    pub fn columns(&self) -> &[String] {
        match self {
            Self::PrimaryKey { columns } => columns,
            Self::ForeignKey(fk) => &fk.columns,
        }
    }
}
