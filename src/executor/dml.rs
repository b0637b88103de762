/// DML (Data Manipulation Language) operations
///
/// INSERT, UPDATE, DELETE, TRUNCATE and CREATE TABLE AS. Every statement
/// computes its complete change first, validates the table image it would
/// leave behind, and only then touches the store through the statement's
/// undo log.
use std::collections::HashSet;

use tracing::debug;

use super::conditions::ConditionEvaluator;
use super::queries::Tuple;
use super::{QueryResult, StatementContext};
use crate::ast::{Expr, InsertSource, LogicalPlan, TableAlias};
use crate::catalog::Catalog;
use crate::planner::physical::ROW_ID_COLUMN;
use crate::storage::TableStore;
use crate::transaction::{StatementState, StatementTransaction, UndoEntry};
use crate::types::{
    CastMode, Column, DatabaseError, ForeignKey, ObjectKind, ObjectName, QualifiedName, Row, RowId, Table, Value,
    ValueKey, cast,
};

pub struct DmlExecutor;

/// Result of a data-modifying statement
#[derive(Debug)]
pub struct DmlOutcome {
    pub result: QueryResult,
    pub table: QualifiedName,
    /// Rows inserted, updated or deleted, for statistics staleness
    pub modified: u64,
}

impl DmlOutcome {
    fn affected(table: &Table, modified: usize) -> Self {
        Self {
            result: QueryResult::Affected(modified),
            table: table.name.clone(),
            modified: modified as u64,
        }
    }
}

/// Pending change to one table: rows that disappear and rows that appear.
/// An update is a removal of the old image plus an addition of the new one.
#[derive(Debug, Default)]
pub(super) struct TableChange {
    pub removed: HashSet<RowId>,
    pub added: Vec<Vec<Value>>,
}

impl DmlExecutor {
    /// Execute INSERT ... VALUES / INSERT ... SELECT
    pub fn insert(
        ctx: &StatementContext<'_>,
        tx: &mut StatementTransaction,
        table_name: &ObjectName,
        columns: Option<&[String]>,
        source: &InsertSource,
    ) -> Result<DmlOutcome, DatabaseError> {
        let table = ctx.catalog.table(&ctx.session.qualify(table_name))?;
        let positions = Self::column_positions(table, columns)?;

        let source_rows = match source {
            InsertSource::Values(rows) => rows.clone(),
            InsertSource::Query(query) => {
                tx.advance(StatementState::Planning)?;
                let plan = ctx.plan(query)?;
                if plan.schema().len() != positions.len() {
                    return Err(DatabaseError::TypeMismatch(format!(
                        "INSERT into '{}' expects {} columns, query returns {}",
                        table.name,
                        positions.len(),
                        plan.schema().len()
                    )));
                }
                ctx.executor(&plan).execute()?
            }
        };

        let mut rows = Vec::with_capacity(source_rows.len());
        for (i, values) in source_rows.into_iter().enumerate() {
            rows.push(Self::build_row(table, &positions, values, i + 1)?);
        }
        let change = TableChange {
            removed: HashSet::new(),
            added: rows,
        };
        validate_change(ctx, table, &change)?;

        tx.advance(StatementState::Executing)?;
        let count = change.added.len();
        tx.insert(ctx.store, table.handle, change.added.into_iter().map(Row::new).collect())?;
        debug!(table = %table.name, rows = count, "inserted rows");
        Ok(DmlOutcome::affected(table, count))
    }

    /// Table ordinals the listed columns map to, in list order
    pub(super) fn column_positions(table: &Table, columns: Option<&[String]>) -> Result<Vec<usize>, DatabaseError> {
        let Some(columns) = columns else {
            return Ok((0..table.columns.len()).collect());
        };
        let mut positions = Vec::with_capacity(columns.len());
        for column in columns {
            let index = table.column_index(column)?;
            if positions.contains(&index) {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "column '{column}' of '{}' listed more than once",
                    table.name
                )));
            }
            positions.push(index);
        }
        Ok(positions)
    }

    /// Full-width row from values for `positions`; unlisted columns are NULL
    pub(super) fn build_row(
        table: &Table,
        positions: &[usize],
        values: Vec<Value>,
        row_number: usize,
    ) -> Result<Vec<Value>, DatabaseError> {
        if values.len() != positions.len() {
            return Err(DatabaseError::TypeMismatch(format!(
                "row {row_number} for '{}' has {} values, expected {}",
                table.name,
                values.len(),
                positions.len()
            )));
        }
        let mut row = vec![Value::Null; table.columns.len()];
        for (position, value) in positions.iter().zip(values) {
            let column = &table.columns[*position];
            row[*position] = cast::convert_for_column(&value, &column.data_type, CastMode::Assignment, &column.name)?;
        }
        Ok(row)
    }

    /// Execute UPDATE t SET ... [WHERE p]
    pub fn update(
        ctx: &StatementContext<'_>,
        tx: &mut StatementTransaction,
        target: &TableAlias,
        assignments: &[crate::ast::Assignment],
        filter: Option<&Expr>,
    ) -> Result<DmlOutcome, DatabaseError> {
        let table = ctx.catalog.table(&ctx.session.qualify(&target.table))?;
        let mut targets = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let index = table.column_index(&assignment.column)?;
            if targets.contains(&index) {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "column '{}' of '{}' assigned more than once",
                    assignment.column, table.name
                )));
            }
            targets.push(index);
        }

        tx.advance(StatementState::Planning)?;
        let logical = target_scan(target, filter.cloned());
        let exprs: Vec<Expr> = assignments.iter().map(|a| a.value.clone()).collect();
        let (plan, resolved) = ctx.plan_with_exprs(&logical, &exprs)?;
        let mut executor = ctx.executor(&plan);
        let matched = executor.execute()?;

        let width = table.columns.len();
        let mut change = TableChange::default();
        let mut updates = Vec::with_capacity(matched.len());
        for row in matched {
            let id = row_id_of(&row)?;
            let mut new_values = row[..width].to_vec();
            for (index, typed) in targets.iter().zip(&resolved) {
                let value = ConditionEvaluator::evaluate(&typed.expr, &row, &mut executor)?;
                let column = &table.columns[*index];
                new_values[*index] =
                    cast::convert_for_column(&value, &column.data_type, CastMode::Assignment, &column.name)?;
            }
            change.removed.insert(id);
            change.added.push(new_values.clone());
            updates.push((id, new_values));
        }
        validate_change(ctx, table, &change)?;

        tx.advance(StatementState::Executing)?;
        for (id, values) in updates {
            ctx.cancel.check()?;
            tx.update(ctx.store, table.handle, id, values)?;
        }
        let count = change.added.len();
        debug!(table = %table.name, rows = count, "updated rows");
        Ok(DmlOutcome::affected(table, count))
    }

    /// Execute DELETE FROM t [USING other] [WHERE p]
    pub fn delete(
        ctx: &StatementContext<'_>,
        tx: &mut StatementTransaction,
        target: &TableAlias,
        using: Option<&TableAlias>,
        filter: Option<&Expr>,
    ) -> Result<DmlOutcome, DatabaseError> {
        let table = ctx.catalog.table(&ctx.session.qualify(&target.table))?;

        tx.advance(StatementState::Planning)?;
        let logical = match using {
            // Each target row is emitted once however many `other` rows match
            Some(other) => LogicalPlan::SemiJoin {
                left: Box::new(target_scan(target, None)),
                right: Box::new(LogicalPlan::scan(other.table.clone(), &other.alias)),
                on: filter.cloned().unwrap_or(Expr::Literal(Value::Boolean(true))),
            },
            None => target_scan(target, filter.cloned()),
        };
        let plan = ctx.plan(&logical)?;
        let rows = ctx.executor(&plan).execute()?;
        let ids = rows.iter().map(|r| row_id_of(r)).collect::<Result<Vec<_>, _>>()?;

        let change = TableChange {
            removed: ids.iter().copied().collect(),
            added: Vec::new(),
        };
        validate_change(ctx, table, &change)?;

        tx.advance(StatementState::Executing)?;
        let removed = tx.delete(ctx.store, table.handle, &ids)?;
        debug!(table = %table.name, rows = removed, "deleted rows");
        Ok(DmlOutcome::affected(table, removed))
    }

    /// Execute TRUNCATE TABLE t
    pub fn truncate(
        ctx: &StatementContext<'_>,
        tx: &mut StatementTransaction,
        table_name: &ObjectName,
    ) -> Result<DmlOutcome, DatabaseError> {
        let table = ctx.catalog.table(&ctx.session.qualify(table_name))?;
        for referencing in ctx.catalog.referencing_tables(&table.name) {
            if ctx.store.row_count(referencing.handle)? > 0 {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "cannot truncate '{}': referenced by rows of '{}'",
                    table.name, referencing.name
                )));
            }
        }
        let count = ctx.store.row_count(table.handle)?;

        tx.advance(StatementState::Executing)?;
        tx.truncate(ctx.store, table.handle)?;
        debug!(table = %table.name, rows = count, "truncated table");
        Ok(DmlOutcome {
            result: QueryResult::Success(format!("Table '{}' truncated", table.name)),
            table: table.name.clone(),
            modified: count as u64,
        })
    }

    /// Plan and run the query of CREATE TABLE t AS SELECT ...
    pub fn query_table_shape(
        ctx: &StatementContext<'_>,
        tx: &mut StatementTransaction,
        name: &ObjectName,
        query: &LogicalPlan,
    ) -> Result<TableFromQuery, DatabaseError> {
        let name = ctx.session.qualify(name);
        if ctx.catalog.table_exists(&name) {
            return Err(DatabaseError::AlreadyExists(ObjectKind::Table, name.to_string()));
        }
        tx.advance(StatementState::Planning)?;
        let plan = ctx.plan(query)?;
        let columns = plan
            .schema()
            .iter()
            .enumerate()
            .map(|(i, c)| Column::new(c.name.clone(), c.data_type.clone(), c.nullable, i))
            .collect();
        let rows = ctx.executor(&plan).execute()?;
        Ok(TableFromQuery { name, columns, rows })
    }

    /// Register the table of CREATE TABLE AS and bulk-load its rows.
    ///
    /// The table goes into the undo log, so rolling back the statement
    /// drops it again.
    pub fn create_table_as(
        catalog: &mut Catalog,
        store: &dyn TableStore,
        tx: &mut StatementTransaction,
        shape: TableFromQuery,
    ) -> Result<DmlOutcome, DatabaseError> {
        let TableFromQuery { name, columns, rows } = shape;
        tx.advance(StatementState::Executing)?;
        let handle = catalog.create_table_as_query(store, name.clone(), columns.clone())?;
        tx.record(UndoEntry::CreatedTable { name: name.clone() });

        let mut loaded = Vec::with_capacity(rows.len());
        for values in rows {
            let mut row = Vec::with_capacity(values.len());
            for (value, column) in values.iter().zip(&columns) {
                row.push(cast::convert_for_column(value, &column.data_type, CastMode::Assignment, &column.name)?);
            }
            loaded.push(Row::new(row));
        }
        let count = loaded.len();
        tx.insert(store, handle, loaded)?;
        debug!(table = %name, rows = count, "created table from query");
        Ok(DmlOutcome {
            result: QueryResult::Success(format!("Table '{name}' created with {count} rows")),
            table: name,
            modified: count as u64,
        })
    }
}

/// Output shape and rows of a CREATE TABLE AS query
#[derive(Debug)]
pub struct TableFromQuery {
    pub name: QualifiedName,
    pub columns: Vec<Column>,
    pub rows: Vec<Tuple>,
}

/// Scan of a DML target carrying row ids, optionally filtered
pub(super) fn target_scan(target: &TableAlias, filter: Option<Expr>) -> LogicalPlan {
    let scan = LogicalPlan::Scan {
        table: target.table.clone(),
        alias: target.alias.clone(),
        with_row_id: true,
    };
    match filter {
        Some(predicate) => scan.filter(predicate),
        None => scan,
    }
}

/// Row id carried in the last column of a target scan row
pub(super) fn row_id_of(row: &[Value]) -> Result<RowId, DatabaseError> {
    match row.last() {
        Some(Value::Integer(id)) => u64::try_from(*id)
            .map(RowId)
            .map_err(|_| DatabaseError::Storage(format!("invalid row id {id}"))),
        _ => Err(DatabaseError::Storage(format!("row carries no {ROW_ID_COLUMN}"))),
    }
}

/// Key over `columns`, `None` when any part is NULL
fn key_of(values: &[Value], columns: &[usize]) -> Option<Vec<ValueKey>> {
    columns
        .iter()
        .map(|c| match &values[*c] {
            Value::Null => None,
            v => Some(v.key()),
        })
        .collect()
}

fn describe_key(values: &[Value], columns: &[usize]) -> String {
    columns
        .iter()
        .map(|c| values[*c].to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_indices(table: &Table, columns: &[String]) -> Result<Vec<usize>, DatabaseError> {
    columns.iter().map(|c| table.column_index(c)).collect()
}

/// Check the table image `change` would leave behind: NOT NULL, primary key
/// uniqueness, outgoing foreign keys and incoming foreign keys (restrict)
pub(super) fn validate_change(
    ctx: &StatementContext<'_>,
    table: &Table,
    change: &TableChange,
) -> Result<(), DatabaseError> {
    for (n, row) in change.added.iter().enumerate() {
        for (column, value) in table.columns.iter().zip(row) {
            if !column.nullable && value.is_null() {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "row {}: NULL in NOT NULL column '{}' of '{}'",
                    n + 1,
                    column.name,
                    table.name
                )));
            }
        }
    }

    // Rows that stay
    let mut kept: Vec<Vec<Value>> = Vec::new();
    for (id, row) in ctx.store.scan(table.handle)? {
        if !change.removed.contains(&id) {
            kept.push(row.values);
        }
    }

    let pk = table.primary_key_indices();
    if !pk.is_empty() && !change.added.is_empty() {
        let mut keys: HashSet<Vec<ValueKey>> = kept.iter().filter_map(|r| key_of(r, &pk)).collect();
        for (n, row) in change.added.iter().enumerate() {
            if let Some(key) = key_of(row, &pk) {
                if !keys.insert(key) {
                    return Err(DatabaseError::ConstraintViolation(format!(
                        "row {}: duplicate primary key ({}) in '{}'",
                        n + 1,
                        describe_key(row, &pk),
                        table.name
                    )));
                }
            }
        }
    }

    let image = || kept.iter().chain(&change.added);
    let outgoing = table.foreign_keys().filter(|_| !change.added.is_empty());
    for fk in outgoing {
        let columns = column_indices(table, &fk.columns)?;
        let present = referenced_keys(ctx, table, fk, image())?;
        for (n, row) in change.added.iter().enumerate() {
            if let Some(key) = key_of(row, &columns) {
                if !present.contains(&key) {
                    return Err(DatabaseError::ConstraintViolation(format!(
                        "row {}: ({}) in '{}' has no matching row in '{}'",
                        n + 1,
                        describe_key(row, &columns),
                        table.name,
                        fk.referenced_table
                    )));
                }
            }
        }
    }

    if change.removed.is_empty() {
        return Ok(());
    }
    check_restrict(ctx, table, change, &kept)
}

/// Keys of `fk`'s referenced table; for a self reference, of the new image
fn referenced_keys<'r>(
    ctx: &StatementContext<'_>,
    table: &Table,
    fk: &ForeignKey,
    image: impl Iterator<Item = &'r Vec<Value>>,
) -> Result<HashSet<Vec<ValueKey>>, DatabaseError> {
    if fk.referenced_table == table.name {
        let columns = column_indices(table, &fk.referenced_columns)?;
        return Ok(image.filter_map(|r| key_of(r, &columns)).collect());
    }
    let referenced = ctx.catalog.table(&fk.referenced_table)?;
    let columns = column_indices(referenced, &fk.referenced_columns)?;
    Ok(ctx
        .store
        .scan(referenced.handle)?
        .filter_map(|(_, row)| key_of(&row.values, &columns))
        .collect())
}

/// Removed key values still referenced from another row are a violation
fn check_restrict(
    ctx: &StatementContext<'_>,
    table: &Table,
    change: &TableChange,
    kept: &[Vec<Value>],
) -> Result<(), DatabaseError> {
    let referencing: Vec<&Table> = ctx
        .catalog
        .referencing_tables(&table.name)
        .chain(std::iter::once(table))
        .collect();

    if !referencing.iter().any(|t| t.foreign_keys().any(|fk| fk.referenced_table == table.name)) {
        return Ok(());
    }
    let removed_rows: Vec<Vec<Value>> = ctx
        .store
        .scan(table.handle)?
        .filter(|(id, _)| change.removed.contains(id))
        .map(|(_, row)| row.values)
        .collect();

    for other in referencing {
        for fk in other.foreign_keys().filter(|fk| fk.referenced_table == table.name) {
            let referenced = column_indices(table, &fk.referenced_columns)?;
            let surviving: HashSet<Vec<ValueKey>> = kept
                .iter()
                .chain(&change.added)
                .filter_map(|r| key_of(r, &referenced))
                .collect();
            let lost: HashSet<Vec<ValueKey>> = removed_rows
                .iter()
                .filter_map(|r| key_of(r, &referenced))
                .filter(|k| !surviving.contains(k))
                .collect();
            if lost.is_empty() {
                continue;
            }

            let columns = column_indices(other, &fk.columns)?;
            let still_referenced = if other.name == table.name {
                kept.iter().chain(&change.added).any(|r| key_of(r, &columns).is_some_and(|k| lost.contains(&k)))
            } else {
                ctx.store
                    .scan(other.handle)?
                    .any(|(_, r)| key_of(&r.values, &columns).is_some_and(|k| lost.contains(&k)))
            };
            if still_referenced {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "rows of '{}' are still referenced by '{}'",
                    table.name, other.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Assignment;
    use crate::catalog::Session;
    use crate::config::EngineConfig;
    use crate::storage::{MemoryStore, TableStore};
    use crate::transaction::CancellationToken;
    use crate::types::{Constraint, DataType};

    struct Fixture {
        catalog: Catalog,
        store: MemoryStore,
        session: Session,
        config: EngineConfig,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let mut catalog = Catalog::new();
            let store = MemoryStore::new();
            let session = Session::default();
            let country = session.qualify(&ObjectName::new("country"));
            catalog
                .create_table(
                    &store,
                    country.clone(),
                    vec![Column::new("code", DataType::Text, false, 0)],
                    vec![Constraint::PrimaryKey {
                        columns: vec!["code".to_string()],
                    }],
                )
                .unwrap();
            catalog
                .create_table(
                    &store,
                    session.qualify(&ObjectName::new("employee")),
                    vec![
                        Column::new("id", DataType::Integer, false, 0),
                        Column::new("country_code", DataType::Text, true, 1),
                    ],
                    vec![
                        Constraint::PrimaryKey {
                            columns: vec!["id".to_string()],
                        },
                        Constraint::ForeignKey(ForeignKey {
                            columns: vec!["country_code".to_string()],
                            referenced_table: country,
                            referenced_columns: vec!["code".to_string()],
                        }),
                    ],
                )
                .unwrap();
            Self {
                catalog,
                store,
                session,
                config: EngineConfig::default(),
                cancel: CancellationToken::new(),
            }
        }

        fn ctx(&self) -> StatementContext<'_> {
            StatementContext {
                catalog: &self.catalog,
                store: &self.store,
                session: &self.session,
                config: &self.config,
                cancel: &self.cancel,
            }
        }

        fn insert(&self, table: &str, rows: Vec<Vec<Value>>) -> Result<DmlOutcome, DatabaseError> {
            let mut tx = StatementTransaction::new(1);
            let result = DmlExecutor::insert(
                &self.ctx(),
                &mut tx,
                &ObjectName::new(table),
                None,
                &InsertSource::Values(rows),
            );
            match result {
                Ok(outcome) => {
                    tx.commit()?;
                    Ok(outcome)
                }
                Err(err) => {
                    tx.rollback(&self.store, None);
                    Err(err)
                }
            }
        }

        fn count(&self, table: &str) -> usize {
            let table = self.catalog.table(&self.session.qualify(&ObjectName::new(table))).unwrap();
            self.store.row_count(table.handle).unwrap()
        }
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn seeded() -> Fixture {
        let fixture = Fixture::new();
        fixture
            .insert("country", vec![vec![text("FI")], vec![text("UK")]])
            .unwrap();
        fixture
            .insert(
                "employee",
                vec![
                    vec![Value::Integer(1), text("FI")],
                    vec![Value::Integer(2), text("UK")],
                    vec![Value::Integer(3), Value::Null],
                ],
            )
            .unwrap();
        fixture
    }

    #[test]
    fn test_insert_rejects_duplicate_key_in_batch() {
        let fixture = seeded();
        let err = fixture
            .insert("country", vec![vec![text("AU")], vec![text("AU")]])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(ref m) if m.starts_with("row 2")));
        assert_eq!(fixture.count("country"), 2);
    }

    #[test]
    fn test_insert_checks_foreign_key() {
        let fixture = seeded();
        let err = fixture
            .insert("employee", vec![vec![Value::Integer(4), text("SE")]])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
        assert_eq!(fixture.count("employee"), 3);
    }

    #[test]
    fn test_insert_coerces_and_checks_arity() {
        let fixture = seeded();
        let err = fixture.insert("employee", vec![vec![Value::Integer(9)]]).unwrap_err();
        assert!(matches!(err, DatabaseError::TypeMismatch(_)));
        let err = fixture
            .insert("employee", vec![vec![Value::Real(4.5), Value::Null]])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::TypeConversionError { .. }));
        fixture
            .insert("employee", vec![vec![Value::SmallInt(4), Value::Null]])
            .unwrap();
    }

    #[test]
    fn test_delete_restricted_by_reference() {
        let fixture = seeded();
        let mut tx = StatementTransaction::new(2);
        let target = TableAlias::new("country", "c");
        let filter = Expr::eq(Expr::col("c", "code"), Expr::Literal(text("FI")));
        let err = DmlExecutor::delete(&fixture.ctx(), &mut tx, &target, None, Some(&filter)).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
        assert_eq!(fixture.count("country"), 2);
    }

    #[test]
    fn test_update_sees_final_image() {
        let fixture = seeded();
        // Swapping two keys in one statement never collides
        let mut tx = StatementTransaction::new(3);
        let target = TableAlias::new("employee", "e");
        let assignment = Assignment::new(
            "id",
            Expr::binary(
                crate::ast::BinaryOp::Minus,
                Expr::Literal(Value::Integer(3)),
                Expr::col("e", "id"),
            ),
        );
        let filter = Expr::binary(
            crate::ast::BinaryOp::LtEq,
            Expr::col("e", "id"),
            Expr::Literal(Value::Integer(2)),
        );
        let outcome =
            DmlExecutor::update(&fixture.ctx(), &mut tx, &target, &[assignment], Some(&filter)).unwrap();
        tx.commit().unwrap();
        assert_eq!(outcome.result, QueryResult::Affected(2));

        let table = fixture.catalog.table(&fixture.session.qualify(&ObjectName::new("employee"))).unwrap();
        let rows: Vec<Vec<Value>> = fixture.store.scan(table.handle).unwrap().map(|(_, r)| r.values).collect();
        assert_eq!(rows[0], vec![Value::Integer(2), text("FI")]);
        assert_eq!(rows[1], vec![Value::Integer(1), text("UK")]);
    }

    #[test]
    fn test_truncate_blocked_by_referencing_rows() {
        let fixture = seeded();
        let mut tx = StatementTransaction::new(4);
        let err = DmlExecutor::truncate(&fixture.ctx(), &mut tx, &ObjectName::new("country")).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
    }
}
