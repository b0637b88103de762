/// Engine - entry point for validated statements
///
/// Owns the shared catalog, the table store, the intent lock manager and the
/// configuration. Each statement takes its intents up front, runs as its own
/// atomic unit and releases everything when it returns.
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, warn};

use crate::ast::{
    AlterTableOperation, Expr, InsertSource, LogicalPlan, MergeAction, MergeSource, Statement, TableConstraint,
};
use crate::catalog::{Catalog, Session};
use crate::config::EngineConfig;
use crate::executor::dml::DmlOutcome;
use crate::executor::{DdlExecutor, DmlExecutor, MergeExecutor, QueryResult, StatementContext};
use crate::planner::statistics::StatisticsEstimator;
use crate::storage::{MemoryStore, TableStore};
use crate::transaction::{
    CancellationToken, LockManager, LockMode, LockRequest, StatementManager, StatementTransaction,
};
use crate::types::{DatabaseError, ObjectName, QualifiedName};

pub struct Engine {
    catalog: RwLock<Catalog>,
    store: Arc<dyn TableStore>,
    locks: LockManager,
    statements: StatementManager,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Engine over a fresh in-memory store
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    #[must_use]
    pub fn with_store(config: EngineConfig, store: Arc<dyn TableStore>) -> Self {
        Self {
            catalog: RwLock::new(Catalog::new()),
            store,
            locks: LockManager::new(),
            statements: StatementManager::new(),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn TableStore {
        self.store.as_ref()
    }

    /// Read access to the catalog, for inspection between statements
    pub fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read()
    }

    /// Number of statements currently running
    pub fn active_statements(&self) -> usize {
        self.statements.active_count()
    }

    pub fn execute(&self, session: &mut Session, statement: &Statement) -> Result<QueryResult, DatabaseError> {
        self.execute_with_cancel(session, statement, &CancellationToken::new())
    }

    /// Execute one statement; `cancel` may be triggered from another thread
    pub fn execute_with_cancel(
        &self,
        session: &mut Session,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, DatabaseError> {
        cancel.check()?;
        let request = self.lock_request(session, statement);
        let _intents = self.locks.acquire(request, cancel)?;

        let id = self.statements.begin();
        debug!(statement = id, kind = statement_kind(statement), "executing statement");
        let result = self.dispatch(id, session, statement, cancel);
        self.statements.finish(id);
        if let Err(err) = &result {
            debug!(statement = id, error = %err, "statement failed");
        }
        result
    }

    fn dispatch(
        &self,
        id: u64,
        session: &mut Session,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, DatabaseError> {
        match statement {
            Statement::Use { database, schema } => {
                DdlExecutor::use_namespace(&self.catalog.read(), session, database.as_deref(), schema.as_deref())
            }
            Statement::Describe { name } => DdlExecutor::describe(&self.catalog.read(), session, name),
            Statement::ShowTables { schema } => {
                DdlExecutor::show_tables(&self.catalog.read(), session, schema.as_ref())
            }
            Statement::Query(plan) => {
                let catalog = self.catalog.read();
                self.context(&catalog, session, cancel).query(plan)
            }
            Statement::Explain(plan) => {
                let catalog = self.catalog.read();
                self.context(&catalog, session, cancel).explain(plan)
            }
            Statement::CreateTableAs { name, query } => self.create_table_as(id, session, name, query, cancel),
            ddl if ddl.is_ddl() => {
                let mut catalog = self.catalog.write();
                DdlExecutor::execute(&mut catalog, self.store.as_ref(), session, cancel, ddl)
            }
            dml => self.modify(id, session, dml, cancel),
        }
    }

    fn context<'a>(
        &'a self,
        catalog: &'a Catalog,
        session: &'a Session,
        cancel: &'a CancellationToken,
    ) -> StatementContext<'a> {
        StatementContext {
            catalog,
            store: self.store.as_ref(),
            session,
            config: &self.config,
            cancel,
        }
    }

    /// INSERT, UPDATE, DELETE, TRUNCATE and MERGE: run under a shared catalog
    /// guard, undo every applied change on failure
    fn modify(
        &self,
        id: u64,
        session: &Session,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, DatabaseError> {
        let mut tx = StatementTransaction::new(id);
        let outcome = {
            let catalog = self.catalog.read();
            let ctx = self.context(&catalog, session, cancel);
            let result = match statement {
                Statement::Insert { table, columns, source } => {
                    DmlExecutor::insert(&ctx, &mut tx, table, columns.as_deref(), source)
                }
                Statement::Update {
                    target,
                    assignments,
                    filter,
                } => DmlExecutor::update(&ctx, &mut tx, target, assignments, filter.as_ref()),
                Statement::Delete { target, using, filter } => {
                    DmlExecutor::delete(&ctx, &mut tx, target, using.as_ref(), filter.as_ref())
                }
                Statement::Truncate { table } => DmlExecutor::truncate(&ctx, &mut tx, table),
                Statement::Merge(merge) => MergeExecutor::execute(&ctx, &mut tx, merge),
                other => Err(DatabaseError::PlanningError(format!(
                    "statement '{}' cannot modify rows",
                    statement_kind(other)
                ))),
            };
            match result {
                Ok(outcome) => outcome,
                Err(err) => {
                    tx.rollback(self.store.as_ref(), None);
                    return Err(err);
                }
            }
        };
        tx.commit()?;
        self.refresh_statistics(&outcome, cancel);
        Ok(outcome.result)
    }

    /// CREATE TABLE AS: the query runs under a shared guard, the table is
    /// registered and loaded under an exclusive one
    fn create_table_as(
        &self,
        id: u64,
        session: &Session,
        name: &ObjectName,
        query: &LogicalPlan,
        cancel: &CancellationToken,
    ) -> Result<QueryResult, DatabaseError> {
        let mut tx = StatementTransaction::new(id);
        let shape = {
            let catalog = self.catalog.read();
            let ctx = self.context(&catalog, session, cancel);
            DmlExecutor::query_table_shape(&ctx, &mut tx, name, query)
        };
        let shape = match shape {
            Ok(shape) => shape,
            Err(err) => {
                tx.rollback(self.store.as_ref(), None);
                return Err(err);
            }
        };

        let mut catalog = self.catalog.write();
        match DmlExecutor::create_table_as(&mut catalog, self.store.as_ref(), &mut tx, shape) {
            Ok(outcome) => {
                drop(catalog);
                tx.commit()?;
                self.refresh_statistics(&outcome, cancel);
                Ok(outcome.result)
            }
            Err(err) => {
                tx.rollback(self.store.as_ref(), Some(&mut catalog));
                Err(err)
            }
        }
    }

    /// Count the committed changes and recount the table once it is stale.
    ///
    /// The statement has already committed: a failed recount leaves the old
    /// statistics in place and planning recounts lazily.
    fn refresh_statistics(&self, outcome: &DmlOutcome, cancel: &CancellationToken) {
        if outcome.modified == 0 {
            return;
        }
        let ratio = self.config.statistics.staleness_ratio;
        let mut catalog = self.catalog.write();
        let stale = match catalog.record_modifications(&outcome.table, outcome.modified, ratio) {
            Ok(stale) => stale,
            Err(err) => {
                warn!(table = %outcome.table, error = %err, "could not record modifications");
                return;
            }
        };
        if !stale {
            return;
        }
        let estimator = StatisticsEstimator::new(
            self.store.as_ref(),
            &self.config.statistics,
            cancel,
            self.config.execution.cancel_check_interval,
        );
        let computed = catalog.table(&outcome.table).and_then(|table| estimator.compute(table));
        match computed.and_then(|stats| {
            let rows = stats.row_count;
            catalog.store_statistics(&outcome.table, stats).map(|()| rows)
        }) {
            Ok(rows) => debug!(table = %outcome.table, rows, "statistics recomputed"),
            Err(err) => warn!(table = %outcome.table, error = %err, "statistics recount skipped"),
        }
    }

    /// Intents a statement needs, derived from the catalog as it is now
    fn lock_request(&self, session: &Session, statement: &Statement) -> LockRequest {
        let catalog = self.catalog.read();
        let request = LockRequest::new();
        match statement {
            Statement::CreateDatabase { .. } | Statement::DropDatabase { .. } | Statement::Use { .. } => request,
            Statement::CreateSchema { schema, .. } | Statement::DropSchema { schema, .. } => {
                request.schema(&session.qualify_schema(schema), LockMode::Exclusive)
            }
            Statement::RenameSchema { schema, new_name } => {
                let old = session.qualify_schema(schema);
                let mut renamed = old.clone();
                renamed.schema.clone_from(new_name);
                request
                    .schema(&old, LockMode::Exclusive)
                    .schema(&renamed, LockMode::Exclusive)
            }
            Statement::CreateTable { name, constraints, .. } => {
                let mut request = request.write_table(&session.qualify(name));
                for constraint in constraints {
                    if let TableConstraint::ForeignKey { referenced_table, .. } = constraint {
                        request = request.read_table(&session.qualify(referenced_table));
                    }
                }
                request
            }
            Statement::DropTable { name, .. } | Statement::Truncate { table: name } => {
                write_with_neighbours(request, &catalog, &session.qualify(name))
            }
            Statement::AlterTable { name, operation } => {
                let name = session.qualify(name);
                let request = write_with_neighbours(request, &catalog, &name);
                match operation {
                    AlterTableOperation::RenameTable(new_name) => request.write_table(
                        &QualifiedName::new(name.database.clone(), name.schema.clone(), new_name.clone()),
                    ),
                    _ => request,
                }
            }
            Statement::Describe { name } => request.read_table(&session.qualify(name)),
            Statement::ShowTables { schema } => {
                let schema = schema
                    .as_ref()
                    .map_or_else(|| session.current_schema(), |s| session.qualify_schema(s));
                request.schema(&schema, LockMode::Shared)
            }
            Statement::CreateTableAs { name, query } => {
                read_plan_tables(request.write_table(&session.qualify(name)), session, query)
            }
            Statement::Insert { table, source, .. } => {
                let request = write_with_neighbours(request, &catalog, &session.qualify(table));
                match source {
                    InsertSource::Query(query) => read_plan_tables(request, session, query),
                    InsertSource::Values(_) => request,
                }
            }
            Statement::Update {
                target,
                assignments,
                filter,
            } => {
                let request = write_with_neighbours(request, &catalog, &session.qualify(&target.table));
                let exprs = assignments.iter().map(|a| &a.value).chain(filter.as_ref());
                read_expr_tables(request, session, exprs)
            }
            Statement::Delete { target, using, filter } => {
                let mut request = write_with_neighbours(request, &catalog, &session.qualify(&target.table));
                if let Some(other) = using {
                    request = request.read_table(&session.qualify(&other.table));
                }
                read_expr_tables(request, session, filter.as_ref())
            }
            Statement::Merge(merge) => {
                let mut request = write_with_neighbours(request, &catalog, &session.qualify(&merge.target.table));
                request = match &merge.source {
                    MergeSource::Table(table) => request.read_table(&session.qualify(table)),
                    MergeSource::Query(query) => read_plan_tables(request, session, query),
                };
                let mut exprs = vec![&merge.on];
                for clause in &merge.clauses {
                    exprs.extend(clause.condition.as_ref());
                    match &clause.action {
                        MergeAction::Update(assignments) => exprs.extend(assignments.iter().map(|a| &a.value)),
                        MergeAction::Insert { values, .. } => exprs.extend(values),
                        MergeAction::Delete => {}
                    }
                }
                read_expr_tables(request, session, exprs)
            }
            Statement::Query(plan) | Statement::Explain(plan) => read_plan_tables(request, session, plan),
        }
    }
}

/// Exclusive intent on `name`, shared intents on the tables its foreign keys
/// point at and on the tables pointing at it
fn write_with_neighbours(request: LockRequest, catalog: &Catalog, name: &QualifiedName) -> LockRequest {
    let mut request = request.write_table(name);
    if let Ok(table) = catalog.table(name) {
        for fk in table.foreign_keys() {
            request = request.read_table(&fk.referenced_table);
        }
    }
    for referencing in catalog.referencing_tables(name) {
        request = request.read_table(&referencing.name);
    }
    request
}

fn read_plan_tables(request: LockRequest, session: &Session, plan: &LogicalPlan) -> LockRequest {
    let mut tables = Vec::new();
    plan.collect_tables(&mut tables);
    tables
        .into_iter()
        .fold(request, |request, table| request.read_table(&session.qualify(table)))
}

fn read_expr_tables<'e>(
    request: LockRequest,
    session: &Session,
    exprs: impl IntoIterator<Item = &'e Expr>,
) -> LockRequest {
    let mut tables = Vec::new();
    for expr in exprs {
        expr.collect_tables(&mut tables);
    }
    tables
        .into_iter()
        .fold(request, |request, table| request.read_table(&session.qualify(table)))
}

const fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::CreateDatabase { .. } => "CREATE DATABASE",
        Statement::DropDatabase { .. } => "DROP DATABASE",
        Statement::CreateSchema { .. } => "CREATE SCHEMA",
        Statement::DropSchema { .. } => "DROP SCHEMA",
        Statement::RenameSchema { .. } => "ALTER SCHEMA RENAME",
        Statement::Use { .. } => "USE",
        Statement::CreateTable { .. } => "CREATE TABLE",
        Statement::CreateTableAs { .. } => "CREATE TABLE AS",
        Statement::DropTable { .. } => "DROP TABLE",
        Statement::AlterTable { .. } => "ALTER TABLE",
        Statement::Describe { .. } => "DESCRIBE",
        Statement::ShowTables { .. } => "SHOW TABLES",
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::Merge(_) => "MERGE",
        Statement::Query(_) => "SELECT",
        Statement::Explain(_) => "EXPLAIN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ColumnDef;
    use crate::types::{DataType, Value};

    fn engine_with_employee() -> (Engine, Session) {
        let engine = Engine::default();
        let mut session = Session::default();
        engine
            .execute(
                &mut session,
                &Statement::CreateTable {
                    name: ObjectName::new("employee"),
                    columns: vec![
                        ColumnDef::new("id", DataType::Integer).primary_key(),
                        ColumnDef::new("name", DataType::Text),
                    ],
                    constraints: vec![],
                    if_not_exists: false,
                },
            )
            .unwrap();
        (engine, session)
    }

    fn insert(ids: &[i64]) -> Statement {
        Statement::Insert {
            table: ObjectName::new("employee"),
            columns: None,
            source: InsertSource::Values(
                ids.iter()
                    .map(|id| vec![Value::Integer(*id), Value::Text(format!("e{id}"))])
                    .collect(),
            ),
        }
    }

    #[test]
    fn test_failed_statement_leaves_no_rows() {
        let (engine, mut session) = engine_with_employee();
        engine.execute(&mut session, &insert(&[1])).unwrap();
        let err = engine.execute(&mut session, &insert(&[2, 1])).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));

        let handle = engine.catalog().table(&session.qualify(&ObjectName::new("employee"))).unwrap().handle;
        assert_eq!(engine.store().row_count(handle).unwrap(), 1);
        assert_eq!(engine.active_statements(), 0);
    }

    #[test]
    fn test_statistics_refreshed_once_stale() {
        let (engine, mut session) = engine_with_employee();
        engine.execute(&mut session, &insert(&[1, 2, 3, 4])).unwrap();
        let catalog = engine.catalog();
        let table = catalog.table(&session.qualify(&ObjectName::new("employee"))).unwrap();
        let stats = table.statistics.as_ref().unwrap();
        assert_eq!(stats.row_count, 4);
        assert_eq!(table.modifications, 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let (engine, mut session) = engine_with_employee();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .execute_with_cancel(&mut session, &insert(&[1]), &cancel)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::CancellationRequested));
    }

    #[test]
    fn test_lock_request_covers_neighbours() {
        let (engine, mut session) = engine_with_employee();
        engine
            .execute(
                &mut session,
                &Statement::CreateTable {
                    name: ObjectName::new("badge"),
                    columns: vec![ColumnDef::new("employee_id", DataType::Integer)],
                    constraints: vec![TableConstraint::ForeignKey {
                        columns: vec!["employee_id".to_string()],
                        referenced_table: ObjectName::new("employee"),
                        referenced_columns: vec![],
                    }],
                    if_not_exists: false,
                },
            )
            .unwrap();
        let request = engine.lock_request(&session, &Statement::Truncate {
            table: ObjectName::new("employee"),
        });
        let guard = engine.locks.acquire(request, &CancellationToken::new()).unwrap();
        // schema plus both tables
        assert_eq!(guard.keys().count(), 3);
    }
}
