use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{DatabaseError, ObjectKind};
use super::table::Table;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub schemas: BTreeMap<String, Schema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub tables: BTreeMap<String, Table>,
}

impl Database {
    #[must_use]
    pub const fn new(name: String) -> Self {
        Self {
            name,
            schemas: BTreeMap::new(),
        }
    }

    pub fn schema(&self, name: &str) -> Result<&Schema, DatabaseError> {
        self.schemas
            .get(name)
            .ok_or_else(|| DatabaseError::NotFound(ObjectKind::Schema, format!("{}.{name}", self.name)))
    }

    pub fn schema_mut(&mut self, name: &str) -> Result<&mut Schema, DatabaseError> {
        let db = self.name.clone();
        self.schemas
            .get_mut(name)
            .ok_or_else(|| DatabaseError::NotFound(ObjectKind::Schema, format!("{db}.{name}")))
    }
}

impl Schema {
    #[must_use]
    pub const fn new(name: String) -> Self {
        Self {
            name,
            tables: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
