// Shared helpers for the integration suites
#![allow(dead_code)]

use relcore::ast::{ColumnDef, InsertSource, TableConstraint};
use relcore::types::{ObjectName, QualifiedName};
use relcore::{DataType, DatabaseError, Engine, LogicalPlan, QueryResult, Session, Statement, TableStore, Value};

pub struct Harness {
    pub engine: Engine,
    pub session: Session,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_engine(Engine::default())
    }

    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine,
            session: Session::default(),
        }
    }

    pub fn run(&mut self, statement: Statement) -> QueryResult {
        self.engine
            .execute(&mut self.session, &statement)
            .unwrap_or_else(|err| panic!("{statement:?} failed: {err}"))
    }

    pub fn try_run(&mut self, statement: Statement) -> Result<QueryResult, DatabaseError> {
        self.engine.execute(&mut self.session, &statement)
    }

    /// Rows of a query, sorted by their rendered values
    pub fn rows(&mut self, query: LogicalPlan) -> Vec<Vec<Value>> {
        let mut rows = self.run(Statement::Query(query)).rows().unwrap().to_vec();
        rows.sort_by_key(|row| row.iter().map(ToString::to_string).collect::<Vec<_>>());
        rows
    }

    pub fn row_count(&self, table: &str) -> usize {
        let name = self.qualified(table);
        let handle = self.engine.catalog().table(&name).unwrap().handle;
        self.engine.store().row_count(handle).unwrap()
    }

    pub fn qualified(&self, table: &str) -> QualifiedName {
        self.session.qualify(&ObjectName::from(table))
    }

    pub fn describe(&mut self, table: &str) -> Vec<Vec<Value>> {
        self.run(Statement::Describe {
            name: ObjectName::from(table),
        })
        .rows()
        .unwrap()
        .to_vec()
    }
}

pub fn int(i: i64) -> Value {
    Value::Integer(i)
}

pub fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

pub fn create_table(name: &str, columns: Vec<ColumnDef>, constraints: Vec<TableConstraint>) -> Statement {
    Statement::CreateTable {
        name: ObjectName::from(name),
        columns,
        constraints,
        if_not_exists: false,
    }
}

pub fn insert(table: &str, rows: Vec<Vec<Value>>) -> Statement {
    Statement::Insert {
        table: ObjectName::from(table),
        columns: None,
        source: InsertSource::Values(rows),
    }
}

pub fn foreign_key(column: &str, table: &str) -> TableConstraint {
    TableConstraint::ForeignKey {
        columns: vec![column.to_string()],
        referenced_table: ObjectName::from(table),
        referenced_columns: vec![],
    }
}

/// `employee(employee_id PK, first_name, country_code)` with employees in
/// FI, UK, AU and FI
pub fn employee_scenario() -> Harness {
    let mut h = Harness::new();
    h.run(create_table(
        "employee",
        vec![
            ColumnDef::new("employee_id", DataType::Integer).primary_key(),
            ColumnDef::new("first_name", DataType::Text),
            ColumnDef::new("country_code", DataType::Text),
        ],
        vec![],
    ));
    h.run(insert(
        "employee",
        vec![
            vec![int(1), text("Aino"), text("FI")],
            vec![int(2), text("Oliver"), text("UK")],
            vec![int(3), text("Charlotte"), text("AU")],
            vec![int(4), text("Eero"), text("FI")],
        ],
    ));
    h
}

/// `country(code PK, name)` holding FI, UK and AU
pub fn add_countries(h: &mut Harness) {
    h.run(create_table(
        "country",
        vec![
            ColumnDef::new("code", DataType::Text).primary_key(),
            ColumnDef::new("name", DataType::Text),
        ],
        vec![],
    ));
    h.run(insert(
        "country",
        vec![
            vec![text("FI"), text("Finland")],
            vec![text("UK"), text("United Kingdom")],
            vec![text("AU"), text("Australia")],
        ],
    ));
}

/// Two-column `name(k INTEGER PK, v TEXT)`
pub fn key_value_table(h: &mut Harness, name: &str, rows: &[(i64, &str)]) {
    h.run(create_table(
        name,
        vec![
            ColumnDef::new("k", DataType::Integer).primary_key(),
            ColumnDef::new("v", DataType::Text),
        ],
        vec![],
    ));
    if !rows.is_empty() {
        h.run(insert(name, rows.iter().map(|(k, v)| vec![int(*k), text(v)]).collect()));
    }
}
