/// DDL (Data Definition Language) operations
///
/// CREATE/DROP DATABASE and SCHEMA, CREATE/DROP/ALTER TABLE, DESCRIBE,
/// SHOW TABLES and USE. Validation lives in the catalog; this layer turns
/// statements into catalog calls and results.
use tracing::info;

use super::QueryResult;
use crate::ast::{AlterTableOperation, ColumnDef, SchemaRef, Statement, TableConstraint};
use crate::catalog::{Catalog, DEFAULT_SCHEMA, Session};
use crate::storage::TableStore;
use crate::transaction::CancellationToken;
use crate::types::{
    Column, Constraint, DatabaseError, ForeignKey, ObjectKind, ObjectName, QualifiedName, SchemaName, Value,
};

pub struct DdlExecutor;

impl DdlExecutor {
    /// Execute a catalog-mutating statement
    pub fn execute(
        catalog: &mut Catalog,
        store: &dyn TableStore,
        session: &Session,
        cancel: &CancellationToken,
        statement: &Statement,
    ) -> Result<QueryResult, DatabaseError> {
        match statement {
            Statement::CreateDatabase { name, if_not_exists } => {
                if *if_not_exists && catalog.database(name).is_ok() {
                    return Ok(QueryResult::Success(format!("Database '{name}' already exists")));
                }
                catalog.create_database(name)?;
                info!(database = %name, "database created");
                Ok(QueryResult::Success(format!("Database '{name}' created successfully")))
            }
            Statement::DropDatabase { name, if_exists } => {
                if *if_exists && catalog.database(name).is_err() {
                    return Ok(QueryResult::Success(format!("Database '{name}' does not exist")));
                }
                catalog.drop_database(name)?;
                Ok(QueryResult::Success(format!("Database '{name}' dropped successfully")))
            }
            Statement::CreateSchema { schema, if_not_exists } => {
                let name = session.qualify_schema(schema);
                if *if_not_exists && catalog.schema_exists(&name) {
                    return Ok(QueryResult::Success(format!("Schema '{name}' already exists")));
                }
                catalog.create_schema(&name)?;
                Ok(QueryResult::Success(format!("Schema '{name}' created successfully")))
            }
            Statement::DropSchema { schema, if_exists } => {
                let name = session.qualify_schema(schema);
                if *if_exists && !catalog.schema_exists(&name) {
                    return Ok(QueryResult::Success(format!("Schema '{name}' does not exist")));
                }
                catalog.drop_schema(&name)?;
                Ok(QueryResult::Success(format!("Schema '{name}' dropped successfully")))
            }
            Statement::RenameSchema { schema, new_name } => {
                let name = session.qualify_schema(schema);
                catalog.rename_schema(&name, new_name)?;
                Ok(QueryResult::Success(format!("Schema '{name}' renamed to '{new_name}'")))
            }
            Statement::CreateTable {
                name,
                columns,
                constraints,
                if_not_exists,
            } => {
                let qualified = session.qualify(name);
                if *if_not_exists && catalog.table_exists(&qualified) {
                    return Ok(QueryResult::Success(format!("Table '{qualified}' already exists")));
                }
                Self::create_table(catalog, store, session, qualified, columns, constraints)
            }
            Statement::DropTable { name, if_exists } => {
                let qualified = session.qualify(name);
                if *if_exists && !catalog.table_exists(&qualified) {
                    return Ok(QueryResult::Success(format!("Table '{qualified}' does not exist")));
                }
                catalog.drop_table(store, &qualified)?;
                Ok(QueryResult::Success(format!("Table '{qualified}' dropped successfully")))
            }
            Statement::AlterTable { name, operation } => {
                Self::alter_table(catalog, store, &session.qualify(name), operation, cancel)
            }
            other => Err(DatabaseError::PlanningError(format!(
                "not a catalog-mutating statement: {other:?}"
            ))),
        }
    }

    /// Execute CREATE TABLE statement
    ///
    /// Column-level PRIMARY KEY flags form the key when no table-level one is
    /// given; a foreign key without referenced columns targets the primary key.
    fn create_table(
        catalog: &mut Catalog,
        store: &dyn TableStore,
        session: &Session,
        name: QualifiedName,
        column_defs: &[ColumnDef],
        table_constraints: &[TableConstraint],
    ) -> Result<QueryResult, DatabaseError> {
        let columns: Vec<Column> = column_defs
            .iter()
            .enumerate()
            .map(|(i, def)| Column::new(def.name.clone(), def.data_type.clone(), def.nullable && !def.primary_key, i))
            .collect();

        let mut constraints = Vec::new();
        let column_key: Vec<String> = column_defs
            .iter()
            .filter(|d| d.primary_key)
            .map(|d| d.name.clone())
            .collect();
        if !column_key.is_empty() {
            constraints.push(Constraint::PrimaryKey { columns: column_key });
        }
        for constraint in table_constraints {
            constraints.push(match constraint {
                TableConstraint::PrimaryKey(columns) => Constraint::PrimaryKey {
                    columns: columns.clone(),
                },
                TableConstraint::ForeignKey {
                    columns,
                    referenced_table,
                    referenced_columns,
                } => {
                    let referenced_table = session.qualify(referenced_table);
                    let referenced_columns = if !referenced_columns.is_empty() {
                        referenced_columns.clone()
                    } else if referenced_table == name {
                        Self::declared_key(column_defs, table_constraints)
                    } else {
                        catalog
                            .table(&referenced_table)?
                            .primary_key()
                            .map(<[String]>::to_vec)
                            .unwrap_or_default()
                    };
                    Constraint::ForeignKey(ForeignKey {
                        columns: columns.clone(),
                        referenced_table,
                        referenced_columns,
                    })
                }
            });
        }

        catalog.create_table(store, name.clone(), columns, constraints)?;
        info!(table = %name, "table created");
        Ok(QueryResult::Success(format!("Table '{name}' created successfully")))
    }

    fn declared_key(column_defs: &[ColumnDef], constraints: &[TableConstraint]) -> Vec<String> {
        constraints
            .iter()
            .find_map(|c| match c {
                TableConstraint::PrimaryKey(columns) => Some(columns.clone()),
                TableConstraint::ForeignKey { .. } => None,
            })
            .unwrap_or_else(|| {
                column_defs
                    .iter()
                    .filter(|d| d.primary_key)
                    .map(|d| d.name.clone())
                    .collect()
            })
    }

    /// Execute ALTER TABLE statement
    ///
    /// Operations:
    /// - ADD COLUMN
    /// - DROP COLUMN
    /// - ALTER COLUMN ... SET DATA TYPE
    /// - RENAME COLUMN
    /// - RENAME TO (table rename)
    fn alter_table(
        catalog: &mut Catalog,
        store: &dyn TableStore,
        name: &QualifiedName,
        operation: &AlterTableOperation,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, DatabaseError> {
        match operation {
            AlterTableOperation::AddColumn(def) => {
                let ordinal = catalog.table(name)?.columns.len();
                let column = Column::new(def.name.clone(), def.data_type.clone(), def.nullable, ordinal);
                catalog.alter_add_column(store, name, column, cancel)?;
                Ok(QueryResult::Success(format!("Column '{}' added to '{name}'", def.name)))
            }
            AlterTableOperation::DropColumn(column) => {
                catalog.alter_drop_column(store, name, column, cancel)?;
                Ok(QueryResult::Success(format!("Column '{column}' dropped from '{name}'")))
            }
            AlterTableOperation::AlterColumnType { column, data_type } => {
                catalog.alter_column_type(store, name, column, data_type.clone(), cancel)?;
                Ok(QueryResult::Success(format!(
                    "Column '{column}' of '{name}' changed to {data_type}"
                )))
            }
            AlterTableOperation::RenameColumn { old_name, new_name } => {
                catalog.alter_rename_column(name, old_name, new_name)?;
                Ok(QueryResult::Success(format!(
                    "Column '{old_name}' of '{name}' renamed to '{new_name}'"
                )))
            }
            AlterTableOperation::RenameTable(new_name) => {
                let renamed = catalog.rename_table(name, new_name)?;
                Ok(QueryResult::Success(format!("Table '{name}' renamed to '{renamed}'")))
            }
        }
    }

    /// Execute DESCRIBE statement: one row per column
    pub fn describe(catalog: &Catalog, session: &Session, name: &ObjectName) -> Result<QueryResult, DatabaseError> {
        let table = catalog.table(&session.qualify(name))?;
        let key = table.primary_key().unwrap_or_default();
        let rows = table
            .columns
            .iter()
            .map(|c| {
                vec![
                    Value::Text(c.name.clone()),
                    Value::Text(c.data_type.to_string()),
                    Value::Boolean(c.nullable),
                    Value::Boolean(key.contains(&c.name)),
                ]
            })
            .collect();
        Ok(QueryResult::Rows(
            rows,
            vec![
                "column_name".to_string(),
                "data_type".to_string(),
                "nullable".to_string(),
                "primary_key".to_string(),
            ],
        ))
    }

    /// Execute SHOW TABLES statement
    pub fn show_tables(
        catalog: &Catalog,
        session: &Session,
        schema: Option<&SchemaRef>,
    ) -> Result<QueryResult, DatabaseError> {
        let name = schema.map_or_else(|| session.current_schema(), |s| session.qualify_schema(s));
        let rows = catalog
            .schema(&name)?
            .tables
            .keys()
            .map(|table| vec![Value::Text(table.clone())])
            .collect();
        Ok(QueryResult::Rows(rows, vec!["table_name".to_string()]))
    }

    /// Execute USE: switch the session's database and/or schema
    pub fn use_namespace(
        catalog: &Catalog,
        session: &mut Session,
        database: Option<&str>,
        schema: Option<&str>,
    ) -> Result<QueryResult, DatabaseError> {
        let database = match database {
            Some(db) => {
                catalog.database(db)?;
                db.to_string()
            }
            None => session.database.clone(),
        };
        let schema = match schema {
            Some(schema) => schema.to_string(),
            None if database != session.database => DEFAULT_SCHEMA.to_string(),
            None => session.schema.clone(),
        };
        let target = SchemaName {
            database: database.clone(),
            schema: schema.clone(),
        };
        if !catalog.schema_exists(&target) {
            return Err(DatabaseError::NotFound(ObjectKind::Schema, target.to_string()));
        }
        session.database = database;
        session.schema = schema;
        Ok(QueryResult::Success(format!("Using {target}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::DataType;

    fn create(catalog: &mut Catalog, store: &MemoryStore, statement: Statement) -> Result<QueryResult, DatabaseError> {
        DdlExecutor::execute(catalog, store, &Session::default(), &CancellationToken::new(), &statement)
    }

    #[test]
    fn test_create_table_with_column_key_and_implicit_reference() {
        let mut catalog = Catalog::new();
        let store = MemoryStore::new();
        create(
            &mut catalog,
            &store,
            Statement::CreateTable {
                name: ObjectName::new("country"),
                columns: vec![ColumnDef::new("code", DataType::Text).primary_key()],
                constraints: vec![],
                if_not_exists: false,
            },
        )
        .unwrap();
        create(
            &mut catalog,
            &store,
            Statement::CreateTable {
                name: ObjectName::new("city"),
                columns: vec![
                    ColumnDef::new("name", DataType::Text),
                    ColumnDef::new("country", DataType::Text),
                ],
                constraints: vec![TableConstraint::ForeignKey {
                    columns: vec!["country".to_string()],
                    referenced_table: ObjectName::new("country"),
                    referenced_columns: vec![],
                }],
                if_not_exists: false,
            },
        )
        .unwrap();

        let city = catalog.table(&Session::default().qualify(&ObjectName::new("city"))).unwrap();
        let fk = city.foreign_keys().next().unwrap();
        assert_eq!(fk.referenced_columns, vec!["code".to_string()]);
    }

    #[test]
    fn test_if_not_exists_is_quiet() {
        let mut catalog = Catalog::new();
        let store = MemoryStore::new();
        let statement = Statement::CreateSchema {
            schema: SchemaRef::new("sales"),
            if_not_exists: true,
        };
        create(&mut catalog, &store, statement.clone()).unwrap();
        create(&mut catalog, &store, statement).unwrap();
        let err = create(
            &mut catalog,
            &store,
            Statement::CreateSchema {
                schema: SchemaRef::new("sales"),
                if_not_exists: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::AlreadyExists(ObjectKind::Schema, _)));
    }

    #[test]
    fn test_describe_lists_columns() {
        let mut catalog = Catalog::new();
        let store = MemoryStore::new();
        create(
            &mut catalog,
            &store,
            Statement::CreateTable {
                name: ObjectName::new("employee"),
                columns: vec![
                    ColumnDef::new("employee_id", DataType::Integer).primary_key(),
                    ColumnDef::new("first_name", DataType::Text),
                ],
                constraints: vec![],
                if_not_exists: false,
            },
        )
        .unwrap();
        let result = DdlExecutor::describe(&catalog, &Session::default(), &ObjectName::new("employee")).unwrap();
        let rows = result.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][2], Value::Boolean(false));
        assert_eq!(rows[0][3], Value::Boolean(true));
        assert_eq!(rows[1][3], Value::Boolean(false));
    }

    #[test]
    fn test_use_checks_existence() {
        let mut catalog = Catalog::new();
        let mut session = Session::default();
        assert!(DdlExecutor::use_namespace(&catalog, &mut session, None, Some("sales")).is_err());
        catalog
            .create_schema(&SchemaName {
                database: "memory".to_string(),
                schema: "sales".to_string(),
            })
            .unwrap();
        DdlExecutor::use_namespace(&catalog, &mut session, None, Some("sales")).unwrap();
        assert_eq!(session.schema, "sales");
        assert!(DdlExecutor::use_namespace(&catalog, &mut session, Some("nowhere"), None).is_err());
        assert_eq!(session.schema, "sales");
    }
}
