/// MERGE INTO target USING source ON cond
///
/// The source is evaluated once and numbered, then LEFT JOINed to the target
/// scan: a NULL row id marks a source row without a match. Target rows that
/// no source row reached are the NOT MATCHED BY SOURCE candidates. Clauses of
/// each kind are tried in order and the first whose condition holds acts.
use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::conditions::ConditionEvaluator;
use super::dml::{DmlExecutor, DmlOutcome, TableChange, row_id_of, target_scan, validate_change};
use super::queries::{QueryExecutor, Tuple};
use super::{QueryResult, StatementContext};
use crate::ast::{
    Assignment, Expr, JoinKind, LogicalPlan, MergeAction, MergeClause, MergeMatch, MergeSource, MergeStatement,
    ValuesColumn,
};
use crate::planner::Typed;
use crate::transaction::{StatementState, StatementTransaction};
use crate::types::{CastMode, DataType, DatabaseError, RowId, Table, Value, cast};

/// Ordinal the numbered source carries
const SOURCE_ROW_COLUMN: &str = "$source_row";

pub struct MergeExecutor;

/// Resolved expressions of one WHEN clause
struct CompiledClause<'m> {
    clause: &'m MergeClause,
    condition: Option<Typed>,
    /// Assignment targets (UPDATE) or insert positions (INSERT)
    positions: Vec<usize>,
    values: Vec<Typed>,
}

/// Where the columns of a joined row live
struct Layout {
    /// Width of the numbered source, ordinal included
    source_width: usize,
    target_width: usize,
}

impl Layout {
    fn target<'r>(&self, row: &'r [Value]) -> &'r [Value] {
        &row[self.source_width..self.source_width + self.target_width]
    }

    fn source_row(&self, row: &[Value]) -> Option<i64> {
        row.get(self.source_width - 1).and_then(Value::as_int)
    }
}

#[derive(Default)]
struct Actions {
    updates: Vec<(RowId, Vec<Value>)>,
    deletes: Vec<RowId>,
    inserts: Vec<Vec<Value>>,
}

impl Actions {
    fn count(&self) -> usize {
        self.updates.len() + self.deletes.len() + self.inserts.len()
    }
}

impl MergeExecutor {
    pub fn execute(
        ctx: &StatementContext<'_>,
        tx: &mut StatementTransaction,
        merge: &MergeStatement,
    ) -> Result<DmlOutcome, DatabaseError> {
        let table = ctx.catalog.table(&ctx.session.qualify(&merge.target.table))?;
        tx.advance(StatementState::Planning)?;

        let source = Self::numbered_source(ctx, merge)?;
        let source_width = match &source {
            LogicalPlan::Values { columns, .. } => columns.len(),
            _ => 0,
        };
        let layout = Layout {
            source_width,
            target_width: table.columns.len(),
        };

        let mut actions = Actions::default();
        let matched = Self::apply_source_clauses(ctx, table, merge, source, &layout, &mut actions)?;
        if merge.clauses.iter().any(|c| c.kind == MergeMatch::NotMatchedBySource) {
            Self::apply_by_source_clauses(ctx, table, merge, &matched, &mut actions)?;
        }

        let mut change = TableChange::default();
        change.removed.extend(actions.deletes.iter().copied());
        for (id, values) in &actions.updates {
            change.removed.insert(*id);
            change.added.push(values.clone());
        }
        change.added.extend(actions.inserts.iter().cloned());
        validate_change(ctx, table, &change)?;

        tx.advance(StatementState::Executing)?;
        let count = actions.count();
        tx.delete(ctx.store, table.handle, &actions.deletes)?;
        for (id, values) in actions.updates {
            ctx.cancel.check()?;
            tx.update(ctx.store, table.handle, id, values)?;
        }
        tx.insert(
            ctx.store,
            table.handle,
            actions.inserts.into_iter().map(crate::types::Row::new).collect(),
        )?;
        debug!(table = %table.name, rows = count, "merged rows");
        Ok(DmlOutcome {
            result: QueryResult::Affected(count),
            table: table.name.clone(),
            modified: count as u64,
        })
    }

    /// Source rows materialized as VALUES with a trailing ordinal column
    fn numbered_source(ctx: &StatementContext<'_>, merge: &MergeStatement) -> Result<LogicalPlan, DatabaseError> {
        let logical = match &merge.source {
            MergeSource::Table(name) => LogicalPlan::scan(name.clone(), &merge.source_alias),
            MergeSource::Query(query) => query.clone().alias(&merge.source_alias),
        };
        let plan = ctx.plan(&logical)?;
        let rows = ctx.executor(&plan).execute()?;

        let mut columns: Vec<ValuesColumn> = plan
            .schema()
            .iter()
            .map(|c| ValuesColumn {
                name: c.name.clone(),
                data_type: c.data_type.clone(),
                nullable: c.nullable,
            })
            .collect();
        columns.push(ValuesColumn {
            name: SOURCE_ROW_COLUMN.to_string(),
            data_type: DataType::Integer,
            nullable: false,
        });
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, mut row)| {
                row.push(Value::Integer(i64::try_from(i).unwrap_or(i64::MAX)));
                row
            })
            .collect();
        Ok(LogicalPlan::Values {
            alias: merge.source_alias.clone(),
            columns,
            rows,
        })
    }

    /// WHEN MATCHED and WHEN NOT MATCHED; returns the matched target row ids
    fn apply_source_clauses(
        ctx: &StatementContext<'_>,
        table: &Table,
        merge: &MergeStatement,
        source: LogicalPlan,
        layout: &Layout,
        actions: &mut Actions,
    ) -> Result<HashSet<RowId>, DatabaseError> {
        let joined = source.join(target_scan(&merge.target, None), JoinKind::Left, Some(merge.on.clone()));
        let clauses: Vec<&MergeClause> = merge
            .clauses
            .iter()
            .filter(|c| c.kind != MergeMatch::NotMatchedBySource)
            .collect();
        let (plan, compiled) = compile(ctx, table, &joined, &clauses)?;
        let mut executor = ctx.executor(&plan);
        let rows = executor.execute()?;

        let mut target_of_source: HashMap<i64, RowId> = HashMap::new();
        let mut source_of_target: HashMap<RowId, i64> = HashMap::new();
        for row in &rows {
            let Some(source_row) = layout.source_row(row) else {
                continue;
            };
            if row.last().is_none_or(Value::is_null) {
                continue;
            }
            let id = row_id_of(row)?;
            if target_of_source.insert(source_row, id).is_some() {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "MERGE source row {} matches more than one row of '{}'",
                    source_row + 1,
                    table.name
                )));
            }
            if source_of_target.insert(id, source_row).is_some() {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "MERGE target row of '{}' is matched by more than one source row",
                    table.name
                )));
            }
        }

        for row in &rows {
            ctx.cancel.check()?;
            let matched = !row.last().is_none_or(Value::is_null);
            let kind = if matched { MergeMatch::Matched } else { MergeMatch::NotMatched };
            let Some(clause) = first_applicable(&compiled, kind, row, &mut executor)? else {
                continue;
            };
            if matched {
                let id = row_id_of(row)?;
                record_target_action(table, clause, id, layout.target(row), row, &mut executor, actions)?;
            } else {
                let MergeAction::Insert { .. } = clause.clause.action else {
                    return Err(DatabaseError::PlanningError(
                        "WHEN NOT MATCHED only supports INSERT".to_string(),
                    ));
                };
                let mut values = Vec::with_capacity(clause.values.len());
                for typed in &clause.values {
                    values.push(ConditionEvaluator::evaluate(&typed.expr, row, &mut executor)?);
                }
                let row_number = layout.source_row(row).map_or(0, |r| r as usize + 1);
                actions
                    .inserts
                    .push(DmlExecutor::build_row(table, &clause.positions, values, row_number)?);
            }
        }
        Ok(source_of_target.into_keys().collect())
    }

    /// WHEN NOT MATCHED BY SOURCE over target rows no source row reached
    fn apply_by_source_clauses(
        ctx: &StatementContext<'_>,
        table: &Table,
        merge: &MergeStatement,
        matched: &HashSet<RowId>,
        actions: &mut Actions,
    ) -> Result<(), DatabaseError> {
        let clauses: Vec<&MergeClause> = merge
            .clauses
            .iter()
            .filter(|c| c.kind == MergeMatch::NotMatchedBySource)
            .collect();
        let (plan, compiled) = compile(ctx, table, &target_scan(&merge.target, None), &clauses)?;
        let mut executor = ctx.executor(&plan);
        let width = table.columns.len();
        for row in executor.execute()? {
            let id = row_id_of(&row)?;
            if matched.contains(&id) {
                continue;
            }
            let Some(clause) = first_applicable(&compiled, MergeMatch::NotMatchedBySource, &row, &mut executor)?
            else {
                continue;
            };
            record_target_action(table, clause, id, &row[..width], &row, &mut executor, actions)?;
        }
        Ok(())
    }
}

/// Plan `logical` with every clause expression resolved over its rows
fn compile<'m>(
    ctx: &StatementContext<'_>,
    table: &Table,
    logical: &LogicalPlan,
    clauses: &[&'m MergeClause],
) -> Result<(crate::planner::physical::PhysicalPlan, Vec<CompiledClause<'m>>), DatabaseError> {
    let mut exprs = Vec::new();
    let mut shapes = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let has_condition = clause.condition.is_some();
        exprs.extend(clause.condition.clone());
        let (positions, values): (Vec<usize>, Vec<Expr>) = match &clause.action {
            MergeAction::Update(assignments) => assignment_parts(table, assignments)?,
            MergeAction::Delete => (Vec::new(), Vec::new()),
            MergeAction::Insert { columns, values } => (
                DmlExecutor::column_positions(table, columns.as_deref())?,
                values.clone(),
            ),
        };
        let count = values.len();
        exprs.extend(values);
        shapes.push((has_condition, positions, count));
    }

    let (plan, resolved) = ctx.plan_with_exprs(logical, &exprs)?;
    let mut resolved = resolved.into_iter();
    let mut compiled = Vec::with_capacity(clauses.len());
    for (clause, (has_condition, positions, count)) in clauses.iter().zip(shapes) {
        let condition = if has_condition { resolved.next() } else { None };
        if let Some(condition) = &condition {
            crate::planner::expect_boolean(condition, "MERGE clause condition")?;
        }
        compiled.push(CompiledClause {
            clause: *clause,
            condition,
            positions,
            values: resolved.by_ref().take(count).collect(),
        });
    }
    Ok((plan, compiled))
}

fn assignment_parts(table: &Table, assignments: &[Assignment]) -> Result<(Vec<usize>, Vec<Expr>), DatabaseError> {
    let mut positions = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let index = table.column_index(&assignment.column)?;
        if positions.contains(&index) {
            return Err(DatabaseError::ConstraintViolation(format!(
                "column '{}' of '{}' assigned more than once",
                assignment.column, table.name
            )));
        }
        positions.push(index);
    }
    Ok((positions, assignments.iter().map(|a| a.value.clone()).collect()))
}

fn first_applicable<'c, 'm>(
    compiled: &'c [CompiledClause<'m>],
    kind: MergeMatch,
    row: &[Value],
    executor: &mut QueryExecutor<'_>,
) -> Result<Option<&'c CompiledClause<'m>>, DatabaseError> {
    for clause in compiled.iter().filter(|c| c.clause.kind == kind) {
        let applies = match &clause.condition {
            Some(condition) => ConditionEvaluator::matches(&condition.expr, row, executor)?,
            None => true,
        };
        if applies {
            return Ok(Some(clause));
        }
    }
    Ok(None)
}

/// UPDATE or DELETE of one target row
fn record_target_action(
    table: &Table,
    clause: &CompiledClause<'_>,
    id: RowId,
    target: &[Value],
    row: &[Value],
    executor: &mut QueryExecutor<'_>,
    actions: &mut Actions,
) -> Result<(), DatabaseError> {
    match &clause.clause.action {
        MergeAction::Delete => actions.deletes.push(id),
        MergeAction::Update(_) => {
            let mut values: Tuple = target.to_vec();
            for (index, typed) in clause.positions.iter().zip(&clause.values) {
                let value = ConditionEvaluator::evaluate(&typed.expr, row, executor)?;
                let column = &table.columns[*index];
                values[*index] = cast::convert_for_column(&value, &column.data_type, CastMode::Assignment, &column.name)?;
            }
            actions.updates.push((id, values));
        }
        MergeAction::Insert { .. } => {
            return Err(DatabaseError::PlanningError(format!(
                "{:?} clauses cannot INSERT",
                clause.clause.kind
            )));
        }
    }
    Ok(())
}
