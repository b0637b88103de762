use crate::ast::SchemaRef;
use crate::types::{ObjectName, QualifiedName, SchemaName};

use super::{DEFAULT_DATABASE, DEFAULT_SCHEMA};

/// Per-connection name-resolution context (`USE db`, `USE schema`).
///
/// Passed explicitly wherever unqualified names are qualified; the catalog
/// itself keeps no notion of a current schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub database: String,
    pub schema: String,
}

impl Session {
    #[must_use]
    pub fn new(database: &str, schema: &str) -> Self {
        Self {
            database: database.to_string(),
            schema: schema.to_string(),
        }
    }

    #[must_use]
    pub fn qualify(&self, name: &ObjectName) -> QualifiedName {
        QualifiedName {
            database: name.database.clone().unwrap_or_else(|| self.database.clone()),
            schema: name.schema.clone().unwrap_or_else(|| self.schema.clone()),
            name: name.name.clone(),
        }
    }

    #[must_use]
    pub fn qualify_schema(&self, schema: &SchemaRef) -> SchemaName {
        SchemaName {
            database: schema.database.clone().unwrap_or_else(|| self.database.clone()),
            schema: schema.name.clone(),
        }
    }

    #[must_use]
    pub fn current_schema(&self) -> SchemaName {
        SchemaName {
            database: self.database.clone(),
            schema: self.schema.clone(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE, DEFAULT_SCHEMA)
    }
}
