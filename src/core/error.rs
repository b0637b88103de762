use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of catalog object named in an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Database,
    Schema,
    Table,
    Column,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Database => "Database",
            Self::Schema => "Schema",
            Self::Table => "Table",
            Self::Column => "Column",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("{0} '{1}' not found")]
    NotFound(ObjectKind, String),
    #[error("{0} '{1}' already exists")]
    AlreadyExists(ObjectKind, String),
    #[error("{0} '{1}' is not empty")]
    NotEmpty(ObjectKind, String),
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("Cannot convert value {value} in column '{column}' to {target}")]
    TypeConversionError {
        column: String,
        value: String,
        target: String,
    },
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Planning error: {0}")]
    PlanningError(String),
    #[error("Unsupported plan shape: {0}")]
    UnsupportedPlanShape(String),
    #[error("Statement cancelled")]
    CancellationRequested,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl DatabaseError {
    pub fn table_not_found(name: impl fmt::Display) -> Self {
        Self::NotFound(ObjectKind::Table, name.to_string())
    }

    pub fn column_not_found(table: impl fmt::Display, column: &str) -> Self {
        Self::NotFound(ObjectKind::Column, format!("{table}.{column}"))
    }
}
