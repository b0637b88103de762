/// Catalog - databases, schemas, tables, columns, constraints and statistics
///
/// All methods validate before mutating, so a failed call leaves the catalog
/// as it was. The few operations that rewrite stored rows (ADD/DROP COLUMN,
/// SET DATA TYPE) compute every new row first and undo applied updates if the
/// store fails halfway.
pub mod session;

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::storage::TableStore;
use crate::transaction::CancellationToken;
use crate::types::{
    CastMode, Column, Constraint, DataType, Database, DatabaseError, ObjectKind, QualifiedName,
    Row, RowId, Schema, SchemaName, Table, TableHandle, TableStatistics, Value, cast,
};

pub use session::Session;

pub const DEFAULT_DATABASE: &str = "memory";
pub const DEFAULT_SCHEMA: &str = "main";

/// How often row rewrites look at the cancellation flag
const CANCEL_CHECK_INTERVAL: usize = 1024;

#[derive(Debug, Clone)]
pub struct Catalog {
    databases: BTreeMap<String, Database>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Catalog holding the default database and schema
    #[must_use]
    pub fn new() -> Self {
        let mut db = Database::new(DEFAULT_DATABASE.to_string());
        db.schemas
            .insert(DEFAULT_SCHEMA.to_string(), Schema::new(DEFAULT_SCHEMA.to_string()));
        let mut databases = BTreeMap::new();
        databases.insert(DEFAULT_DATABASE.to_string(), db);
        Self { databases }
    }

    // ---- databases ----

    pub fn create_database(&mut self, name: &str) -> Result<(), DatabaseError> {
        if self.databases.contains_key(name) {
            return Err(DatabaseError::AlreadyExists(ObjectKind::Database, name.to_string()));
        }
        self.databases.insert(name.to_string(), Database::new(name.to_string()));
        debug!(database = name, "created database");
        Ok(())
    }

    pub fn drop_database(&mut self, name: &str) -> Result<(), DatabaseError> {
        let db = self.database(name)?;
        if !db.schemas.is_empty() {
            return Err(DatabaseError::NotEmpty(ObjectKind::Database, name.to_string()));
        }
        self.databases.remove(name);
        debug!(database = name, "dropped database");
        Ok(())
    }

    pub fn database(&self, name: &str) -> Result<&Database, DatabaseError> {
        self.databases
            .get(name)
            .ok_or_else(|| DatabaseError::NotFound(ObjectKind::Database, name.to_string()))
    }

    fn database_mut(&mut self, name: &str) -> Result<&mut Database, DatabaseError> {
        self.databases
            .get_mut(name)
            .ok_or_else(|| DatabaseError::NotFound(ObjectKind::Database, name.to_string()))
    }

    // ---- schemas ----

    pub fn create_schema(&mut self, name: &SchemaName) -> Result<(), DatabaseError> {
        let db = self.database_mut(&name.database)?;
        if db.schemas.contains_key(&name.schema) {
            return Err(DatabaseError::AlreadyExists(ObjectKind::Schema, name.to_string()));
        }
        db.schemas
            .insert(name.schema.clone(), Schema::new(name.schema.clone()));
        debug!(schema = %name, "created schema");
        Ok(())
    }

    pub fn drop_schema(&mut self, name: &SchemaName) -> Result<(), DatabaseError> {
        if !self.schema(name)?.is_empty() {
            return Err(DatabaseError::NotEmpty(ObjectKind::Schema, name.to_string()));
        }
        self.database_mut(&name.database)?.schemas.remove(&name.schema);
        debug!(schema = %name, "dropped schema");
        Ok(())
    }

    pub fn rename_schema(&mut self, name: &SchemaName, new_name: &str) -> Result<(), DatabaseError> {
        let target = SchemaName {
            database: name.database.clone(),
            schema: new_name.to_string(),
        };
        self.schema(name)?;
        if self.schema_exists(&target) {
            return Err(DatabaseError::AlreadyExists(ObjectKind::Schema, target.to_string()));
        }

        let db = self.database_mut(&name.database)?;
        let mut schema = db
            .schemas
            .remove(&name.schema)
            .ok_or_else(|| DatabaseError::NotFound(ObjectKind::Schema, name.to_string()))?;
        schema.name = new_name.to_string();
        for table in schema.tables.values_mut() {
            table.name.schema = new_name.to_string();
        }
        db.schemas.insert(new_name.to_string(), schema);

        self.retarget_foreign_keys(|fk_target| {
            if fk_target.database == name.database && fk_target.schema == name.schema {
                fk_target.schema = new_name.to_string();
            }
        });
        debug!(schema = %name, new_name, "renamed schema");
        Ok(())
    }

    pub fn schema(&self, name: &SchemaName) -> Result<&Schema, DatabaseError> {
        self.database(&name.database)?.schema(&name.schema)
    }

    #[must_use]
    pub fn schema_exists(&self, name: &SchemaName) -> bool {
        self.schema(name).is_ok()
    }

    // ---- tables ----

    pub fn table(&self, name: &QualifiedName) -> Result<&Table, DatabaseError> {
        self.schema(&name.schema_name())?
            .get_table(&name.name)
            .ok_or_else(|| DatabaseError::table_not_found(name))
    }

    fn table_mut(&mut self, name: &QualifiedName) -> Result<&mut Table, DatabaseError> {
        self.database_mut(&name.database)?
            .schema_mut(&name.schema)?
            .get_table_mut(&name.name)
            .ok_or_else(|| DatabaseError::table_not_found(name))
    }

    #[must_use]
    pub fn table_exists(&self, name: &QualifiedName) -> bool {
        self.table(name).is_ok()
    }

    /// Every table of every database
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.databases
            .values()
            .flat_map(|db| db.schemas.values())
            .flat_map(|schema| schema.tables.values())
    }

    /// Tables other than `name` whose foreign keys reference `name`
    pub fn referencing_tables<'a>(
        &'a self,
        name: &'a QualifiedName,
    ) -> impl Iterator<Item = &'a Table> + 'a {
        self.tables().filter(move |t| {
            &t.name != name && t.foreign_keys().any(|fk| &fk.referenced_table == name)
        })
    }

    /// Register a table and allocate its storage
    pub fn create_table(
        &mut self,
        store: &dyn TableStore,
        name: QualifiedName,
        columns: Vec<Column>,
        constraints: Vec<Constraint>,
    ) -> Result<TableHandle, DatabaseError> {
        self.schema(&name.schema_name())?;
        if self.table_exists(&name) {
            return Err(DatabaseError::AlreadyExists(ObjectKind::Table, name.to_string()));
        }

        let mut table = Table::new(name, columns, constraints, TableHandle(0));
        Self::validate_columns(&table)?;
        self.validate_constraints(&mut table)?;

        table.handle = store.create_table(&table.columns)?;
        let handle = table.handle;
        debug!(table = %table.name, handle = handle.0, "created table");
        self.insert_table(table)?;
        Ok(handle)
    }

    /// Register a table whose columns come verbatim from a query's output
    pub fn create_table_as_query(
        &mut self,
        store: &dyn TableStore,
        name: QualifiedName,
        inferred_columns: Vec<Column>,
    ) -> Result<TableHandle, DatabaseError> {
        self.create_table(store, name, inferred_columns, Vec::new())
    }

    pub fn drop_table(&mut self, store: &dyn TableStore, name: &QualifiedName) -> Result<(), DatabaseError> {
        let table = self.table(name)?;
        if let Some(dependent) = self.referencing_tables(name).next() {
            return Err(DatabaseError::ConstraintViolation(format!(
                "table '{}' is referenced by a foreign key of '{}'",
                name, dependent.name
            )));
        }
        store.drop_table(table.handle)?;
        self.database_mut(&name.database)?
            .schema_mut(&name.schema)?
            .tables
            .remove(&name.name);
        debug!(table = %name, "dropped table");
        Ok(())
    }

    pub fn rename_table(&mut self, name: &QualifiedName, new_name: &str) -> Result<QualifiedName, DatabaseError> {
        let target = QualifiedName::new(name.database.clone(), name.schema.clone(), new_name);
        self.table(name)?;
        if self.table_exists(&target) {
            return Err(DatabaseError::AlreadyExists(ObjectKind::Table, target.to_string()));
        }

        let schema = self
            .database_mut(&name.database)?
            .schema_mut(&name.schema)?;
        let mut table = schema
            .tables
            .remove(&name.name)
            .ok_or_else(|| DatabaseError::table_not_found(name))?;
        table.name = target.clone();
        schema.tables.insert(new_name.to_string(), table);

        self.retarget_foreign_keys(|fk_target| {
            if fk_target == name {
                *fk_target = target.clone();
            }
        });
        debug!(table = %name, new_name, "renamed table");
        Ok(target)
    }

    // ---- columns ----

    /// Append a column; existing rows receive NULL
    pub fn alter_add_column(
        &mut self,
        store: &dyn TableStore,
        name: &QualifiedName,
        column: Column,
        cancel: &CancellationToken,
    ) -> Result<(), DatabaseError> {
        let table = self.table(name)?;
        if table.get_column_index(&column.name).is_some() {
            return Err(DatabaseError::AlreadyExists(
                ObjectKind::Column,
                format!("{name}.{}", column.name),
            ));
        }
        let row_count = store.row_count(table.handle)?;
        if !column.nullable && row_count > 0 {
            return Err(DatabaseError::ConstraintViolation(format!(
                "cannot add NOT NULL column '{}' to non-empty table '{name}'",
                column.name
            )));
        }

        rewrite_rows(store, table.handle, cancel, |row| {
            let mut values = row.values.clone();
            values.push(Value::Null);
            Ok(values)
        })?;

        let table = self.table_mut(name)?;
        table.columns.push(column);
        table.renumber_columns();
        table.statistics = None;
        debug!(table = %name, "added column");
        Ok(())
    }

    pub fn alter_drop_column(
        &mut self,
        store: &dyn TableStore,
        name: &QualifiedName,
        column: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DatabaseError> {
        let table = self.table(name)?;
        let index = table.column_index(column)?;
        if table.is_constrained(column) {
            return Err(DatabaseError::ConstraintViolation(format!(
                "column '{column}' of '{name}' is part of a key constraint"
            )));
        }
        if table.columns.len() == 1 {
            return Err(DatabaseError::ConstraintViolation(format!(
                "cannot drop the only column of '{name}'"
            )));
        }

        rewrite_rows(store, table.handle, cancel, |row| {
            let mut values = row.values.clone();
            if index < values.len() {
                values.remove(index);
            }
            Ok(values)
        })?;

        let table = self.table_mut(name)?;
        table.columns.remove(index);
        table.renumber_columns();
        table.statistics = None;
        debug!(table = %name, column, "dropped column");
        Ok(())
    }

    /// `ALTER column SET DATA TYPE`: all stored values convert or nothing changes
    pub fn alter_column_type(
        &mut self,
        store: &dyn TableStore,
        name: &QualifiedName,
        column: &str,
        new_type: DataType,
        cancel: &CancellationToken,
    ) -> Result<(), DatabaseError> {
        let table = self.table(name)?;
        let index = table.column_index(column)?;
        let referenced = self.tables().any(|t| {
            t.foreign_keys().any(|fk| {
                &fk.referenced_table == name && fk.referenced_columns.iter().any(|c| c == column)
            })
        });
        let in_foreign_key =
            referenced || table.foreign_keys().any(|fk| fk.columns.iter().any(|c| c == column));
        if in_foreign_key {
            return Err(DatabaseError::ConstraintViolation(format!(
                "column '{column}' of '{name}' takes part in a foreign key"
            )));
        }

        // converted keys must stay unique ('1' and '01' both become 1)
        let key_indices = table.primary_key_indices();
        let check_keys = key_indices.contains(&index);
        let mut seen_keys = HashSet::new();
        rewrite_rows(store, table.handle, cancel, |row| {
            let mut values = row.values.clone();
            if let Some(value) = values.get_mut(index) {
                *value = cast::convert_for_column(value, &new_type, CastMode::Conversion, column)?;
            }
            if check_keys {
                let key: Vec<_> = key_indices.iter().filter_map(|i| values.get(*i)).map(Value::key).collect();
                if !seen_keys.insert(key) {
                    return Err(DatabaseError::ConstraintViolation(format!(
                        "changing '{column}' of '{name}' to {new_type} makes primary key values collide"
                    )));
                }
            }
            Ok(values)
        })?;

        let table = self.table_mut(name)?;
        table.columns[index].data_type = new_type;
        table.statistics = None;
        debug!(table = %name, column, "changed column type");
        Ok(())
    }

    pub fn alter_rename_column(
        &mut self,
        name: &QualifiedName,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), DatabaseError> {
        let table = self.table(name)?;
        let index = table.column_index(old_name)?;
        if table.get_column_index(new_name).is_some() {
            return Err(DatabaseError::AlreadyExists(
                ObjectKind::Column,
                format!("{name}.{new_name}"),
            ));
        }

        let rename = |columns: &mut Vec<String>| {
            for c in columns.iter_mut().filter(|c| c.as_str() == old_name) {
                *c = new_name.to_string();
            }
        };

        let table = self.table_mut(name)?;
        table.columns[index].name = new_name.to_string();
        for constraint in &mut table.constraints {
            match constraint {
                Constraint::PrimaryKey { columns } => rename(columns),
                Constraint::ForeignKey(fk) => {
                    rename(&mut fk.columns);
                    if &fk.referenced_table == name {
                        rename(&mut fk.referenced_columns);
                    }
                }
            }
        }
        for db in self.databases.values_mut() {
            for schema in db.schemas.values_mut() {
                for other in schema.tables.values_mut().filter(|t| &t.name != name) {
                    for constraint in &mut other.constraints {
                        if let Constraint::ForeignKey(fk) = constraint {
                            if &fk.referenced_table == name {
                                rename(&mut fk.referenced_columns);
                            }
                        }
                    }
                }
            }
        }
        debug!(table = %name, old_name, new_name, "renamed column");
        Ok(())
    }

    // ---- statistics ----

    pub fn store_statistics(&mut self, name: &QualifiedName, statistics: TableStatistics) -> Result<(), DatabaseError> {
        let table = self.table_mut(name)?;
        table.statistics = Some(statistics);
        table.modifications = 0;
        Ok(())
    }

    /// Count rows changed by a committed statement; returns whether the
    /// table's statistics are now stale
    pub fn record_modifications(
        &mut self,
        name: &QualifiedName,
        rows: u64,
        staleness_ratio: f64,
    ) -> Result<bool, DatabaseError> {
        let table = self.table_mut(name)?;
        table.modifications = table.modifications.saturating_add(rows);
        Ok(table.statistics_stale(staleness_ratio))
    }

    pub fn invalidate_statistics(&mut self, name: &QualifiedName) -> Result<(), DatabaseError> {
        self.table_mut(name)?.statistics = None;
        Ok(())
    }

    // ---- helpers ----

    fn insert_table(&mut self, table: Table) -> Result<(), DatabaseError> {
        let name = table.name.clone();
        self.database_mut(&name.database)?
            .schema_mut(&name.schema)?
            .tables
            .insert(name.name, table);
        Ok(())
    }

    fn validate_columns(table: &Table) -> Result<(), DatabaseError> {
        if table.columns.is_empty() {
            return Err(DatabaseError::ConstraintViolation(format!(
                "table '{}' must have at least one column",
                table.name
            )));
        }
        for (i, column) in table.columns.iter().enumerate() {
            if table.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(DatabaseError::AlreadyExists(
                    ObjectKind::Column,
                    format!("{}.{}", table.name, column.name),
                ));
            }
        }
        Ok(())
    }

    /// Check key columns exist, force primary key columns NOT NULL and make
    /// sure foreign keys target a primary key
    fn validate_constraints(&self, table: &mut Table) -> Result<(), DatabaseError> {
        let pk_count = table
            .constraints
            .iter()
            .filter(|c| matches!(c, Constraint::PrimaryKey { .. }))
            .count();
        if pk_count > 1 {
            return Err(DatabaseError::ConstraintViolation(format!(
                "table '{}' declares more than one primary key",
                table.name
            )));
        }

        for constraint in &table.constraints {
            for column in constraint.columns() {
                table.column_index(column)?;
            }
        }

        let pk_columns: Vec<String> = table.primary_key().map(<[String]>::to_vec).unwrap_or_default();
        for column in &mut table.columns {
            if pk_columns.contains(&column.name) {
                column.nullable = false;
            }
        }

        for fk in table.foreign_keys() {
            let target_pk: Vec<String> = if fk.referenced_table == table.name {
                pk_columns.clone()
            } else {
                self.table(&fk.referenced_table)?
                    .primary_key()
                    .map(<[String]>::to_vec)
                    .unwrap_or_default()
            };
            if fk.referenced_columns.is_empty() || fk.referenced_columns != target_pk {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "foreign key on '{}' must reference the primary key of '{}'",
                    table.name, fk.referenced_table
                )));
            }
            if fk.columns.len() != fk.referenced_columns.len() {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "foreign key on '{}' has {} columns but references {}",
                    table.name,
                    fk.columns.len(),
                    fk.referenced_columns.len()
                )));
            }
        }
        Ok(())
    }

    fn retarget_foreign_keys(&mut self, mut retarget: impl FnMut(&mut QualifiedName)) {
        for db in self.databases.values_mut() {
            for schema in db.schemas.values_mut() {
                for table in schema.tables.values_mut() {
                    for constraint in &mut table.constraints {
                        if let Constraint::ForeignKey(fk) = constraint {
                            retarget(&mut fk.referenced_table);
                        }
                    }
                }
            }
        }
    }
}

/// Rewrite every stored row of a table, all or nothing.
///
/// New values are computed for every row before the first update; if the
/// store then fails partway, rows already updated get their old values back.
fn rewrite_rows<F>(
    store: &dyn TableStore,
    handle: TableHandle,
    cancel: &CancellationToken,
    mut rewrite: F,
) -> Result<(), DatabaseError>
where
    F: FnMut(&Row) -> Result<Vec<Value>, DatabaseError>,
{
    let mut planned: Vec<(RowId, Row, Vec<Value>)> = Vec::new();
    for (i, (id, row)) in store.scan(handle)?.enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        let new_values = rewrite(&row)?;
        planned.push((id, row, new_values));
    }

    let mut applied: Vec<(RowId, Row)> = Vec::with_capacity(planned.len());
    for (id, old, new_values) in planned {
        if let Err(err) = store.update(handle, id, new_values) {
            for (id, old) in applied.into_iter().rev() {
                // the original error is what the caller sees
                if let Err(restore) = store.update(handle, id, old.values) {
                    warn!(table = handle.0, row = id.0, error = %restore, "row restore failed");
                }
            }
            return Err(err);
        }
        applied.push((id, old));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::ForeignKey;

    fn name(table: &str) -> QualifiedName {
        QualifiedName::new(DEFAULT_DATABASE, DEFAULT_SCHEMA, table)
    }

    fn create_countries(catalog: &mut Catalog, store: &MemoryStore) -> TableHandle {
        catalog
            .create_table(
                store,
                name("countries"),
                vec![
                    Column::new("code", DataType::Text, true, 0),
                    Column::new("label", DataType::Text, true, 0),
                ],
                vec![Constraint::PrimaryKey {
                    columns: vec!["code".to_string()],
                }],
            )
            .unwrap()
    }

    fn employee_fk() -> Constraint {
        Constraint::ForeignKey(ForeignKey {
            columns: vec!["country".to_string()],
            referenced_table: name("countries"),
            referenced_columns: vec!["code".to_string()],
        })
    }

    #[test]
    fn test_default_schema_exists() {
        let catalog = Catalog::new();
        assert!(catalog.schema_exists(&Session::default().current_schema()));
    }

    #[test]
    fn test_primary_key_forces_not_null() {
        let store = MemoryStore::new();
        let mut catalog = Catalog::new();
        create_countries(&mut catalog, &store);
        let table = catalog.table(&name("countries")).unwrap();
        assert!(!table.columns[0].nullable);
        assert!(table.columns[1].nullable);
    }

    #[test]
    fn test_drop_schema_not_empty() {
        let store = MemoryStore::new();
        let mut catalog = Catalog::new();
        create_countries(&mut catalog, &store);
        let err = catalog
            .drop_schema(&Session::default().current_schema())
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotEmpty(ObjectKind::Schema, _)));
    }

    #[test]
    fn test_foreign_key_must_target_primary_key() {
        let store = MemoryStore::new();
        let mut catalog = Catalog::new();
        create_countries(&mut catalog, &store);
        let err = catalog
            .create_table(
                &store,
                name("employees"),
                vec![Column::new("country", DataType::Text, true, 0)],
                vec![Constraint::ForeignKey(ForeignKey {
                    columns: vec!["country".to_string()],
                    referenced_table: name("countries"),
                    referenced_columns: vec!["label".to_string()],
                })],
            )
            .unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
        assert!(!catalog.table_exists(&name("employees")));
    }

    #[test]
    fn test_drop_referenced_table_rejected() {
        let store = MemoryStore::new();
        let mut catalog = Catalog::new();
        create_countries(&mut catalog, &store);
        catalog
            .create_table(
                &store,
                name("employees"),
                vec![Column::new("country", DataType::Text, true, 0)],
                vec![employee_fk()],
            )
            .unwrap();
        let err = catalog.drop_table(&store, &name("countries")).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
        assert!(catalog.table_exists(&name("countries")));
    }

    #[test]
    fn test_rename_table_updates_foreign_keys() {
        let store = MemoryStore::new();
        let mut catalog = Catalog::new();
        create_countries(&mut catalog, &store);
        catalog
            .create_table(
                &store,
                name("employees"),
                vec![Column::new("country", DataType::Text, true, 0)],
                vec![employee_fk()],
            )
            .unwrap();
        catalog.rename_table(&name("countries"), "nations").unwrap();
        let employees = catalog.table(&name("employees")).unwrap();
        let fk = employees.foreign_keys().next().unwrap();
        assert_eq!(fk.referenced_table, name("nations"));
    }

    #[test]
    fn test_alter_column_type_is_atomic() {
        let store = MemoryStore::new();
        let mut catalog = Catalog::new();
        let handle = catalog
            .create_table(
                &store,
                name("items"),
                vec![Column::new("qty", DataType::Text, true, 0)],
                vec![],
            )
            .unwrap();
        store
            .insert(
                handle,
                vec![
                    Row::new(vec![Value::Text("12".to_string())]),
                    Row::new(vec![Value::Text("UK".to_string())]),
                ],
            )
            .unwrap();

        let err = catalog
            .alter_column_type(
                &store,
                &name("items"),
                "qty",
                DataType::Numeric { precision: 10, scale: 0 },
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, DatabaseError::TypeConversionError { .. }));
        assert_eq!(catalog.table(&name("items")).unwrap().columns[0].data_type, DataType::Text);
        let values: Vec<Value> = store.scan(handle).unwrap().map(|(_, r)| r.values[0].clone()).collect();
        assert_eq!(values, vec![Value::Text("12".to_string()), Value::Text("UK".to_string())]);
    }

    #[test]
    fn test_add_and_drop_column_rewrite_rows() {
        let store = MemoryStore::new();
        let mut catalog = Catalog::new();
        let handle = create_countries(&mut catalog, &store);
        store
            .insert(handle, vec![Row::new(vec![Value::Text("NL".into()), Value::Text("Netherlands".into())])])
            .unwrap();
        let cancel = CancellationToken::new();

        catalog
            .alter_add_column(&store, &name("countries"), Column::new("region", DataType::Text, true, 0), &cancel)
            .unwrap();
        let row = store.scan(handle).unwrap().next().unwrap().1;
        assert_eq!(row.values.len(), 3);
        assert_eq!(row.values[2], Value::Null);

        catalog.alter_drop_column(&store, &name("countries"), "label", &cancel).unwrap();
        let table = catalog.table(&name("countries")).unwrap();
        assert_eq!(table.columns[1].name, "region");
        assert_eq!(table.columns[1].ordinal, 1);
        let row = store.scan(handle).unwrap().next().unwrap().1;
        assert_eq!(row.values, vec![Value::Text("NL".into()), Value::Null]);
    }

    #[test]
    fn test_record_modifications_marks_stale() {
        let store = MemoryStore::new();
        let mut catalog = Catalog::new();
        create_countries(&mut catalog, &store);
        catalog
            .store_statistics(
                &name("countries"),
                TableStatistics {
                    row_count: 10,
                    columns: vec![],
                },
            )
            .unwrap();
        assert!(!catalog.record_modifications(&name("countries"), 2, 0.2).unwrap());
        assert!(catalog.record_modifications(&name("countries"), 1, 0.2).unwrap());
    }
}
