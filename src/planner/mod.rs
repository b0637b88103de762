/// Query planner
///
/// Lowers a bound [`LogicalPlan`] into a [`PhysicalPlan`]: names become
/// column positions, single-relation predicates move into scans, inner join
/// regions are reordered by cost, and subqueries become semi/anti joins
/// where that preserves their semantics.
pub mod algorithm;
pub mod join_order;
pub mod physical;
mod region;
mod resolve;
pub mod rewrite;
pub mod statistics;

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::ast::{
    AggregateExpr, ColumnRef, Expr, JoinKind, LogicalPlan, ProjectItem, ValuesColumn, conjoin,
    split_conjunction,
};
use crate::catalog::{Catalog, Session};
use crate::config::{EngineConfig, PlannerConfig};
use crate::storage::TableStore;
use crate::transaction::CancellationToken;
use crate::types::{ColumnStatistics, DataType, DatabaseError, ObjectName, Value};

use algorithm::{JoinInputs, choose_algorithm};
use physical::{
    JoinAlgorithm, NodeId, Operator, OutputColumn, PhysicalAggregate, PhysicalExpr, PhysicalJoinKind, PhysicalNode,
    PhysicalPlan, ROW_ID_COLUMN,
};
use resolve::ScalarSlot;
pub use resolve::{Typed, aggregate_type, check_comparable, expect_boolean, find_column};
use rewrite::Decorrelated;
use statistics::{DEFAULT_SELECTIVITY, StatisticsEstimator, estimate_selectivity};

/// `(relation, name)` of each output column, known before lowering
type LogicalColumns = Vec<(Option<String>, String)>;

pub struct Planner<'a> {
    catalog: &'a Catalog,
    session: &'a Session,
    config: &'a PlannerConfig,
    estimator: StatisticsEstimator<'a>,
    plan: PhysicalPlan,
    /// Row schemas enclosing the subquery being lowered, innermost last
    outer: Vec<Vec<OutputColumn>>,
    /// Outer columns referenced so far, one set per entry of `outer`
    captures: Vec<BTreeSet<(usize, usize)>>,
    scalar_slots: Vec<ScalarSlot>,
    scan_stats: HashMap<NodeId, Vec<ColumnStatistics>>,
    /// Aliases of decorrelated aggregates computed once per statement
    materialized: HashSet<String>,
    next_alias: usize,
}

impl<'a> Planner<'a> {
    pub fn new(
        catalog: &'a Catalog,
        session: &'a Session,
        store: &'a dyn TableStore,
        config: &'a EngineConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            catalog,
            session,
            config: &config.planner,
            estimator: StatisticsEstimator::new(
                store,
                &config.statistics,
                cancel,
                config.execution.cancel_check_interval,
            ),
            plan: PhysicalPlan::new(),
            outer: Vec::new(),
            captures: Vec::new(),
            scalar_slots: Vec::new(),
            scan_stats: HashMap::new(),
            materialized: HashSet::new(),
            next_alias: 0,
        }
    }

    pub fn plan(self, logical: &LogicalPlan) -> Result<PhysicalPlan, DatabaseError> {
        Ok(self.plan_with_exprs(logical, &[])?.0)
    }

    /// Lower `logical` and resolve `exprs` against its output row
    pub fn plan_with_exprs(
        mut self,
        logical: &LogicalPlan,
        exprs: &[Expr],
    ) -> Result<(PhysicalPlan, Vec<Typed>), DatabaseError> {
        let root = self.lower(logical, Vec::new())?;
        let schema = self.plan.node(root).schema.clone();
        let resolved = exprs
            .iter()
            .map(|e| self.resolve(e, &schema, 0))
            .collect::<Result<Vec<_>, _>>()?;
        self.plan.set_root(root);
        debug!(
            nodes = self.plan.nodes().len(),
            subqueries = self.plan.subqueries().len(),
            "lowered logical plan"
        );
        Ok((self.plan, resolved))
    }

    fn lower(&mut self, logical: &LogicalPlan, pending: Vec<Expr>) -> Result<NodeId, DatabaseError> {
        match logical {
            LogicalPlan::Filter { .. }
            | LogicalPlan::Join {
                kind: JoinKind::Inner | JoinKind::Cross,
                ..
            } => self.lower_region(logical, pending),
            LogicalPlan::Scan {
                table,
                alias,
                with_row_id,
            } => {
                let id = self.lower_scan(table, alias, *with_row_id)?;
                self.apply_pending(id, pending)
            }
            LogicalPlan::Values { alias, columns, rows } => {
                let id = self.lower_values(alias, columns, rows);
                self.apply_pending(id, pending)
            }
            LogicalPlan::Join {
                left,
                right,
                kind: JoinKind::Left,
                on,
            } => self.lower_left_join(left, right, on.as_ref(), pending),
            LogicalPlan::SemiJoin { left, right, on } => {
                self.lower_semi_join(left, right, on, PhysicalJoinKind::Semi, pending)
            }
            LogicalPlan::AntiJoin { left, right, on } => {
                self.lower_semi_join(left, right, on, PhysicalJoinKind::Anti, pending)
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let id = self.lower_aggregate(input, group_by, aggregates)?;
                self.apply_pending(id, pending)
            }
            LogicalPlan::Project { input, items } => {
                let id = self.lower_project(input, items)?;
                self.apply_pending(id, pending)
            }
            LogicalPlan::SubqueryAlias { input, alias } => {
                let mut id = self.lower(input, Vec::new())?;
                for column in &mut self.plan.node_mut(id).schema {
                    column.relation = Some(alias.clone());
                }
                if self.materialized.contains(alias) {
                    let child = self.plan.node(id);
                    let node = PhysicalNode {
                        operator: Operator::Materialize,
                        schema: child.schema.clone(),
                        estimated_rows: child.estimated_rows,
                        children: vec![id],
                        ordering: child.ordering.clone(),
                    };
                    id = self.plan.push(node);
                }
                self.apply_pending(id, pending)
            }
        }
    }

    fn lower_scan(&mut self, name: &ObjectName, alias: &str, with_row_id: bool) -> Result<NodeId, DatabaseError> {
        let catalog = self.catalog;
        let qualified = self.session.qualify(name);
        let table = catalog.table(&qualified)?;
        let stats = self.estimator.estimate(table)?;
        let rows = stats.row_count as f64;

        let mut schema: Vec<OutputColumn> = table
            .columns
            .iter()
            .map(|c| OutputColumn {
                distinct: Some(stats.distinct(c.ordinal)),
                ..OutputColumn::new(Some(alias), &c.name, c.data_type.clone(), c.nullable)
            })
            .collect();
        let mut column_stats: Vec<ColumnStatistics> = (0..table.columns.len())
            .map(|i| stats.column(i).cloned().unwrap_or_default())
            .collect();
        if with_row_id {
            schema.push(OutputColumn {
                distinct: Some(rows.max(1.0)),
                ..OutputColumn::new(Some(alias), ROW_ID_COLUMN, DataType::Integer, false)
            });
            column_stats.push(ColumnStatistics {
                distinct_count: stats.row_count,
                ..ColumnStatistics::default()
            });
        }

        let id = self.plan.push(PhysicalNode {
            operator: Operator::SeqScan {
                table: qualified,
                handle: table.handle,
                filter: None,
                with_row_id,
            },
            schema,
            estimated_rows: rows,
            children: Vec::new(),
            ordering: Vec::new(),
        });
        self.scan_stats.insert(id, column_stats);
        Ok(id)
    }

    fn lower_values(&mut self, alias: &str, columns: &[ValuesColumn], rows: &[Vec<Value>]) -> NodeId {
        let schema = columns
            .iter()
            .map(|c| OutputColumn::new(Some(alias), &c.name, c.data_type.clone(), c.nullable))
            .collect();
        self.plan.push(PhysicalNode {
            operator: Operator::Values { rows: rows.to_vec() },
            schema,
            estimated_rows: rows.len() as f64,
            children: Vec::new(),
            ordering: Vec::new(),
        })
    }

    fn lower_aggregate(
        &mut self,
        input: &LogicalPlan,
        group_by: &[Expr],
        aggregates: &[AggregateExpr],
    ) -> Result<NodeId, DatabaseError> {
        let child = self.lower(input, Vec::new())?;
        let input_schema = self.plan.node(child).schema.clone();
        let input_rows = self.plan.node(child).estimated_rows;

        let mut schema = Vec::with_capacity(group_by.len() + aggregates.len());
        let mut keys = Vec::with_capacity(group_by.len());
        let mut groups = 1.0_f64;
        for (i, expr) in group_by.iter().enumerate() {
            let typed = self.resolve(expr, &input_schema, 0)?;
            let column = match &typed.expr {
                PhysicalExpr::Column(c) => input_schema[*c].clone(),
                _ => OutputColumn::new(None, &format!("group{i}"), typed.column_type(), typed.nullable),
            };
            groups *= column.distinct.unwrap_or(input_rows).max(1.0);
            schema.push(column);
            keys.push(typed.expr);
        }
        let rows = if group_by.is_empty() {
            1.0
        } else {
            groups.min(input_rows)
        };
        for column in &mut schema {
            column.distinct = Some(column.distinct.unwrap_or(rows).min(rows));
        }

        let mut physical = Vec::with_capacity(aggregates.len());
        for aggregate in aggregates {
            let arg = aggregate
                .arg
                .as_ref()
                .map(|a| self.resolve(a, &input_schema, 0))
                .transpose()?;
            let (data_type, nullable) = aggregate_type(aggregate.func, arg.as_ref())?;
            schema.push(OutputColumn {
                distinct: Some(rows),
                ..OutputColumn::new(None, &aggregate.alias, data_type, nullable)
            });
            physical.push(PhysicalAggregate {
                func: aggregate.func,
                arg: arg.map(|t| t.expr),
            });
        }

        Ok(self.plan.push(PhysicalNode {
            operator: Operator::Aggregate {
                group_by: keys,
                aggregates: physical,
            },
            schema,
            estimated_rows: rows,
            children: vec![child],
            ordering: (0..group_by.len()).collect(),
        }))
    }

    fn lower_project(&mut self, input: &LogicalPlan, items: &[ProjectItem]) -> Result<NodeId, DatabaseError> {
        let rewritten = self.decorrelate_scalar_aggregates(input, items)?;
        let (input, items) = match &rewritten {
            Some((input, items)) => (input, items.as_slice()),
            None => (input, items),
        };

        let child = self.lower(input, Vec::new())?;
        let input_schema = self.plan.node(child).schema.clone();
        let child_node = self.plan.node(child);
        let rows = child_node.estimated_rows;
        let child_ordering = child_node.ordering.clone();

        let mut schema = Vec::with_capacity(items.len());
        let mut exprs = Vec::with_capacity(items.len());
        for item in items {
            let typed = self.resolve(&item.expr, &input_schema, 0)?;
            let column = match &typed.expr {
                PhysicalExpr::Column(c) => OutputColumn {
                    name: item.alias.clone(),
                    ..input_schema[*c].clone()
                },
                _ => OutputColumn::new(None, &item.alias, typed.column_type(), typed.nullable),
            };
            schema.push(column);
            exprs.push(typed.expr);
        }
        let ordering = child_ordering
            .iter()
            .map_while(|o| exprs.iter().position(|e| *e == PhysicalExpr::Column(*o)))
            .collect();

        Ok(self.plan.push(PhysicalNode {
            operator: Operator::Project { exprs },
            schema,
            estimated_rows: rows,
            children: vec![child],
            ordering,
        }))
    }

    /// Turn correlated `(SELECT agg(x) FROM r WHERE r.k = outer.k ...)` items
    /// into a LEFT JOIN against `r` aggregated once per `k`
    fn decorrelate_scalar_aggregates(
        &mut self,
        input: &LogicalPlan,
        items: &[ProjectItem],
    ) -> Result<Option<(LogicalPlan, Vec<ProjectItem>)>, DatabaseError> {
        if !items.iter().any(|i| i.expr.contains_subquery()) {
            return Ok(None);
        }
        let visible = self.logical_columns(input)?;
        let mut joined = input.clone();
        let mut done: Vec<(LogicalPlan, Expr)> = Vec::new();
        let rewritten: Vec<ProjectItem> = items
            .iter()
            .map(|item| ProjectItem {
                expr: self.replace_scalar_aggregates(&item.expr, &visible, &mut joined, &mut done),
                alias: item.alias.clone(),
            })
            .collect();
        if done.is_empty() {
            return Ok(None);
        }
        Ok(Some((joined, rewritten)))
    }

    fn replace_scalar_aggregates(
        &mut self,
        expr: &Expr,
        visible: &LogicalColumns,
        joined: &mut LogicalPlan,
        done: &mut Vec<(LogicalPlan, Expr)>,
    ) -> Expr {
        match expr {
            Expr::ScalarSubquery(subquery) => {
                if let Some((_, replacement)) = done.iter().find(|(p, _)| p == &**subquery) {
                    return replacement.clone();
                }
                let Some(matched) = rewrite::match_aggregate_subquery(subquery) else {
                    return expr.clone();
                };
                let outer_visible = matched.keys.iter().all(|(_, outer)| {
                    let mut columns = Vec::new();
                    outer.collect_columns(&mut columns);
                    columns.iter().all(|c| find_named(visible, c).is_some())
                });
                if !outer_visible {
                    return expr.clone();
                }

                let alias = format!("$agg{}", self.next_alias);
                self.next_alias += 1;
                let group_by = matched.keys.iter().map(|(c, _)| Expr::Column(c.clone())).collect();
                let mut outputs: Vec<(Expr, String)> = matched
                    .keys
                    .iter()
                    .enumerate()
                    .map(|(i, (c, _))| (Expr::Column(c.clone()), format!("$k{i}")))
                    .collect();
                outputs.push((Expr::Column(ColumnRef::bare("$value")), "$value".to_string()));
                let aggregated = LogicalPlan::Project {
                    input: Box::new(matched.body.aggregate(group_by, vec![AggregateExpr {
                        func: matched.aggregate.func,
                        arg: matched.aggregate.arg.clone(),
                        alias: "$value".to_string(),
                    }])),
                    items: outputs
                        .into_iter()
                        .map(|(expr, alias)| ProjectItem { expr, alias })
                        .collect(),
                }
                .alias(&alias);
                let on = conjoin(
                    matched
                        .keys
                        .iter()
                        .enumerate()
                        .map(|(i, (_, outer))| Expr::eq(outer.clone(), Expr::col(&alias, &format!("$k{i}"))))
                        .collect(),
                );
                *joined = joined.clone().join(aggregated, JoinKind::Left, on);
                self.materialized.insert(alias.clone());

                let value = Expr::col(&alias, "$value");
                let replacement = if rewrite::counts(matched.aggregate.func) {
                    Expr::Coalesce(vec![value, Expr::lit(Value::Integer(0))])
                } else {
                    value
                };
                debug!(%alias, "decorrelated scalar aggregate subquery");
                done.push(((**subquery).clone(), replacement.clone()));
                replacement
            }
            Expr::Binary { op, left, right } => Expr::binary(
                *op,
                self.replace_scalar_aggregates(left, visible, joined, done),
                self.replace_scalar_aggregates(right, visible, joined, done),
            ),
            Expr::Not(e) => Expr::Not(Box::new(self.replace_scalar_aggregates(e, visible, joined, done))),
            Expr::IsNull(e) => Expr::IsNull(Box::new(self.replace_scalar_aggregates(e, visible, joined, done))),
            Expr::IsNotNull(e) => {
                Expr::IsNotNull(Box::new(self.replace_scalar_aggregates(e, visible, joined, done)))
            }
            Expr::InList { expr, list, negated } => Expr::InList {
                expr: Box::new(self.replace_scalar_aggregates(expr, visible, joined, done)),
                list: list
                    .iter()
                    .map(|e| self.replace_scalar_aggregates(e, visible, joined, done))
                    .collect(),
                negated: *negated,
            },
            Expr::Coalesce(args) => Expr::Coalesce(
                args.iter()
                    .map(|e| self.replace_scalar_aggregates(e, visible, joined, done))
                    .collect(),
            ),
            Expr::Column(_) | Expr::Literal(_) | Expr::Exists { .. } | Expr::InSubquery { .. } => expr.clone(),
        }
    }

    fn lower_left_join(
        &mut self,
        left: &LogicalPlan,
        right: &LogicalPlan,
        on: Option<&Expr>,
        pending: Vec<Expr>,
    ) -> Result<NodeId, DatabaseError> {
        let left_columns = self.logical_columns(left)?;
        let right_columns = self.logical_columns(right)?;
        let on_conjuncts = on.cloned().map(split_conjunction).unwrap_or_default();

        // `WHERE r.k IS NULL` on an ON key keeps exactly the unmatched rows
        let mut pending = pending;
        let anti = pending
            .iter()
            .position(|c| is_null_of_join_key(c, &on_conjuncts, &left_columns, &right_columns))
            .map(|i| pending.remove(i))
            .is_some();

        let (to_left, above): (Vec<Expr>, Vec<Expr>) = pending
            .into_iter()
            .partition(|c| !references(c, &right_columns));
        let (to_right, conditions): (Vec<Expr>, Vec<Expr>) = on_conjuncts
            .into_iter()
            .partition(|c| !c.contains_subquery() && !references(c, &left_columns));

        let left_id = self.lower(left, to_left)?;
        let right_id = self.lower(right, to_right)?;
        let combined = self.combined_schema(left_id, right_id);
        let mut resolved = Vec::with_capacity(conditions.len());
        for condition in &conditions {
            let typed = self.resolve(condition, &combined, 0)?;
            expect_boolean(&typed, "ON")?;
            resolved.push(typed.expr);
        }

        let kind = if anti {
            debug!("rewrote LEFT JOIN ... IS NULL into an anti join");
            PhysicalJoinKind::Anti
        } else {
            PhysicalJoinKind::Left
        };
        let (id, _) = self.build_join(left_id, right_id, kind, resolved, anti, None)?;
        self.apply_pending(id, above)
    }

    fn lower_semi_join(
        &mut self,
        left: &LogicalPlan,
        right: &LogicalPlan,
        on: &Expr,
        kind: PhysicalJoinKind,
        pending: Vec<Expr>,
    ) -> Result<NodeId, DatabaseError> {
        let left_columns = self.logical_columns(left)?;
        let right_columns = self.logical_columns(right)?;
        let mut to_left = pending;
        let mut to_right = Vec::new();
        let mut conditions = Vec::new();
        for conjunct in split_conjunction(on.clone()) {
            if conjunct.contains_subquery() {
                conditions.push(conjunct);
            } else if !references(&conjunct, &left_columns) {
                to_right.push(conjunct);
            } else if kind == PhysicalJoinKind::Semi && !references(&conjunct, &right_columns) {
                to_left.push(conjunct);
            } else {
                conditions.push(conjunct);
            }
        }

        let left_id = self.lower(left, to_left)?;
        let right_id = self.lower(right, to_right)?;
        let width = self.plan.node(left_id).schema.len();
        let combined = self.combined_schema(left_id, right_id);
        let mut resolved = Vec::with_capacity(conditions.len());
        for condition in &conditions {
            let typed = self.resolve(condition, &combined, width)?;
            expect_boolean(&typed, "ON")?;
            resolved.push(typed.expr);
        }
        Ok(self.build_join(left_id, right_id, kind, resolved, false, None)?.0)
    }

    fn combined_schema(&self, left: NodeId, right: NodeId) -> Vec<OutputColumn> {
        let mut schema = self.plan.node(left).schema.clone();
        schema.extend(self.plan.node(right).schema.iter().cloned());
        schema
    }

    /// Conjuncts over the output of `id`: plain ones become a filter,
    /// `[NOT] EXISTS` / `[NOT] IN` become semi or anti joins when possible
    fn apply_pending(&mut self, id: NodeId, pending: Vec<Expr>) -> Result<NodeId, DatabaseError> {
        if pending.is_empty() {
            return Ok(id);
        }
        let (candidates, plain): (Vec<Expr>, Vec<Expr>) =
            pending.into_iter().partition(|c| SemiShape::of(c).is_some());

        let mut id = self.filter(id, &plain)?;
        let mut fallback = Vec::new();
        for conjunct in candidates {
            match self.try_semi_join(id, &conjunct)? {
                Some(joined) => id = joined,
                None => fallback.push(conjunct),
            }
        }
        self.filter(id, &fallback)
    }

    fn filter(&mut self, id: NodeId, conjuncts: &[Expr]) -> Result<NodeId, DatabaseError> {
        if conjuncts.is_empty() {
            return Ok(id);
        }
        let schema = self.plan.node(id).schema.clone();
        let mut predicates = Vec::with_capacity(conjuncts.len());
        for conjunct in conjuncts {
            let typed = self.resolve(conjunct, &schema, 0)?;
            expect_boolean(&typed, "WHERE")?;
            predicates.push(typed.expr);
        }
        let stats = self.column_stats(id);
        let selectivity: f64 = predicates.iter().map(|p| estimate_selectivity(p, &stats)).product();
        let Some(predicate) = PhysicalExpr::conjoin(predicates) else {
            return Ok(id);
        };

        let node = self.plan.node_mut(id);
        let rows = node.estimated_rows * selectivity;
        if let Operator::SeqScan { filter: filter @ None, .. } = &mut node.operator {
            *filter = Some(predicate);
            node.estimated_rows = rows;
            cap_distinct(&mut node.schema, rows);
            return Ok(id);
        }

        let mut schema = node.schema.clone();
        let ordering = node.ordering.clone();
        cap_distinct(&mut schema, rows);
        Ok(self.plan.push(PhysicalNode {
            operator: Operator::Filter { predicate },
            schema,
            estimated_rows: rows,
            children: vec![id],
            ordering,
        }))
    }

    fn try_semi_join(&mut self, left: NodeId, conjunct: &Expr) -> Result<Option<NodeId>, DatabaseError> {
        let Some(shape) = SemiShape::of(conjunct) else {
            return Ok(None);
        };
        let Some(decorrelated) = rewrite::decorrelate(shape.subquery, shape.probe.is_some()) else {
            return Ok(None);
        };
        let mark = self.plan.mark();
        let joined = self.semi_join_from(left, &shape, &decorrelated)?;
        if joined.is_none() {
            self.rollback_to(mark);
        }
        Ok(joined)
    }

    fn semi_join_from(
        &mut self,
        left: NodeId,
        shape: &SemiShape<'_>,
        decorrelated: &Decorrelated,
    ) -> Result<Option<NodeId>, DatabaseError> {
        let right = self.lower(&decorrelated.body, Vec::new())?;
        let left_schema = self.plan.node(left).schema.clone();
        let right_schema = self.plan.node(right).schema.clone();
        let width = left_schema.len();
        let combined = self.combined_schema(left, right);

        let mut conditions = Vec::with_capacity(decorrelated.correlation.len() + 1);
        for conjunct in &decorrelated.correlation {
            let typed = self.resolve(conjunct, &combined, width)?;
            expect_boolean(&typed, "subquery predicate")?;
            conditions.push(typed.expr);
        }
        if let Some(probe) = shape.probe {
            let probe = self.resolve(probe, &left_schema, 0)?;
            let inner = match &decorrelated.output {
                Some(expr) => self.resolve(expr, &right_schema, 0)?,
                None if right_schema.len() == 1 => Typed {
                    expr: PhysicalExpr::Column(0),
                    data_type: Some(right_schema[0].data_type.clone()),
                    nullable: right_schema[0].nullable,
                },
                None => return Ok(None),
            };
            check_comparable(&probe, &inner)?;
            // NOT IN over a NULL is unknown, which an anti join cannot express
            if shape.anti && (probe.nullable || inner.nullable) {
                return Ok(None);
            }
            conditions.push(PhysicalExpr::binary(
                crate::ast::BinaryOp::Eq,
                probe.expr,
                inner.expr.map_columns(&|i| i + width),
            ));
        }

        let kind = if shape.anti {
            PhysicalJoinKind::Anti
        } else {
            PhysicalJoinKind::Semi
        };
        debug!(kind = ?kind, "decorrelated subquery into a join");
        Ok(Some(self.build_join(left, right, kind, conditions, false, None)?.0))
    }

    fn rollback_to(&mut self, mark: (usize, usize)) {
        self.plan.truncate(mark);
        self.scalar_slots.retain(|s| s.slot() < mark.1);
        self.scan_stats.retain(|id, _| *id < mark.0);
    }

    /// Join `left` and `right` on `conditions`, written over `left ++ right`.
    /// Inner joins may swap their inputs; the flag reports whether they did.
    fn build_join(
        &mut self,
        left: NodeId,
        right: NodeId,
        kind: PhysicalJoinKind,
        conditions: Vec<PhysicalExpr>,
        emit_right_nulls: bool,
        rows: Option<f64>,
    ) -> Result<(NodeId, bool), DatabaseError> {
        let left_width = self.plan.node(left).schema.len();
        let right_width = self.plan.node(right).schema.len();
        let (mut keys, residual) = split_keys(conditions, left_width);
        let mut residual = PhysicalExpr::conjoin(residual);

        let left_rows = self.plan.node(left).estimated_rows;
        let right_rows = self.plan.node(right).estimated_rows;
        let left_keys: Vec<PhysicalExpr> = keys.iter().map(|(l, _)| l.clone()).collect();
        let right_keys: Vec<PhysicalExpr> = keys.iter().map(|(_, r)| r.clone()).collect();
        let right_indexed = self.is_index_probe(right, &right_keys);
        let left_indexed = self.is_index_probe(left, &left_keys);
        let ordered = self.ordered_on(left, &left_keys) && self.ordered_on(right, &right_keys);

        let inputs = JoinInputs {
            left_rows,
            right_rows,
            equi: !keys.is_empty(),
            ordered,
            indexed_inner: match kind {
                PhysicalJoinKind::Inner if left_rows > right_rows => left_indexed,
                _ => right_indexed,
            },
            kind,
        };
        let algorithm = choose_algorithm(&inputs, self.config);

        let swappable = kind == PhysicalJoinKind::Inner && !residual.as_ref().is_some_and(PhysicalExpr::has_subquery);
        let swap = swappable
            && match algorithm {
                JoinAlgorithm::IndexNestedLoopJoin => !right_indexed,
                JoinAlgorithm::SortMergeJoin => false,
                _ => left_rows < right_rows,
            };
        let (left, right) = if swap { (right, left) } else { (left, right) };
        if swap {
            keys = keys.into_iter().map(|(l, r)| (r, l)).collect();
            residual = residual.map(|r| {
                r.map_columns(&|i| if i < left_width { i + right_width } else { i - left_width })
            });
        }

        let left_node = self.plan.node(left);
        let right_node = self.plan.node(right);
        let (l, r) = (left_node.estimated_rows, right_node.estimated_rows);
        let key_selectivity: f64 = keys
            .iter()
            .map(|(a, b)| 1.0 / distinct_of(left_node, a).max(distinct_of(right_node, b)).max(1.0))
            .product();
        let selectivity = key_selectivity * residual.as_ref().map_or(1.0, |_| DEFAULT_SELECTIVITY);
        let matched = (r * selectivity).min(1.0);
        let estimated_rows = match kind {
            PhysicalJoinKind::Inner => rows.unwrap_or(l * r * selectivity),
            PhysicalJoinKind::Left => (l * r * selectivity).max(l),
            PhysicalJoinKind::Semi => l * matched,
            PhysicalJoinKind::Anti => l * (1.0 - matched),
        };

        let mut schema = left_node.schema.clone();
        let include_right = matches!(kind, PhysicalJoinKind::Inner | PhysicalJoinKind::Left) || emit_right_nulls;
        if include_right {
            schema.extend(right_node.schema.iter().map(|c| OutputColumn {
                nullable: c.nullable || kind != PhysicalJoinKind::Inner,
                ..c.clone()
            }));
        }
        cap_distinct(&mut schema, estimated_rows);
        let ordering = if algorithm == JoinAlgorithm::SortMergeJoin {
            keys.iter()
                .filter_map(|(l, _)| match l {
                    PhysicalExpr::Column(i) => Some(*i),
                    _ => None,
                })
                .collect()
        } else {
            left_node.ordering.clone()
        };

        let id = self.plan.push(PhysicalNode {
            operator: Operator::Join {
                algorithm,
                kind,
                keys,
                residual,
                emit_right_nulls,
            },
            schema,
            estimated_rows,
            children: vec![left, right],
            ordering,
        });
        Ok((id, swap))
    }

    /// `id` is a base table scan whose single-column primary key is `keys`
    fn is_index_probe(&self, id: NodeId, keys: &[PhysicalExpr]) -> bool {
        let [PhysicalExpr::Column(column)] = keys else {
            return false;
        };
        let Operator::SeqScan { table, .. } = &self.plan.node(id).operator else {
            return false;
        };
        self.catalog
            .table(table)
            .is_ok_and(|t| t.primary_key_indices() == [*column])
    }

    fn ordered_on(&self, id: NodeId, keys: &[PhysicalExpr]) -> bool {
        let ordering = &self.plan.node(id).ordering;
        !keys.is_empty()
            && keys.len() <= ordering.len()
            && keys
                .iter()
                .zip(ordering)
                .all(|(k, o)| *k == PhysicalExpr::Column(*o))
    }

    fn column_stats(&self, id: NodeId) -> Vec<ColumnStatistics> {
        if let Some(stats) = self.scan_stats.get(&id) {
            return stats.clone();
        }
        let node = self.plan.node(id);
        node.schema
            .iter()
            .map(|c| ColumnStatistics {
                distinct_count: c.distinct.unwrap_or(node.estimated_rows).max(1.0) as u64,
                ..ColumnStatistics::default()
            })
            .collect()
    }

    /// Output column names of `logical` without lowering it
    fn logical_columns(&self, logical: &LogicalPlan) -> Result<LogicalColumns, DatabaseError> {
        Ok(match logical {
            LogicalPlan::Scan {
                table,
                alias,
                with_row_id,
            } => {
                let table = self.catalog.table(&self.session.qualify(table))?;
                let mut columns: LogicalColumns = table
                    .columns
                    .iter()
                    .map(|c| (Some(alias.clone()), c.name.clone()))
                    .collect();
                if *with_row_id {
                    columns.push((Some(alias.clone()), ROW_ID_COLUMN.to_string()));
                }
                columns
            }
            LogicalPlan::Values { alias, columns, .. } => columns
                .iter()
                .map(|c| (Some(alias.clone()), c.name.clone()))
                .collect(),
            LogicalPlan::Filter { input, .. } => self.logical_columns(input)?,
            LogicalPlan::Join { left, right, .. } => {
                let mut columns = self.logical_columns(left)?;
                columns.extend(self.logical_columns(right)?);
                columns
            }
            LogicalPlan::SemiJoin { left, .. } | LogicalPlan::AntiJoin { left, .. } => self.logical_columns(left)?,
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let inner = self.logical_columns(input)?;
                let mut columns: LogicalColumns = group_by
                    .iter()
                    .enumerate()
                    .map(|(i, expr)| match expr {
                        Expr::Column(c) => find_named(&inner, c)
                            .map_or_else(|| (c.relation.clone(), c.column.clone()), |p| inner[p].clone()),
                        _ => (None, format!("group{i}")),
                    })
                    .collect();
                columns.extend(aggregates.iter().map(|a| (None, a.alias.clone())));
                columns
            }
            LogicalPlan::Project { input, items } => {
                let inner = self.logical_columns(input)?;
                items
                    .iter()
                    .map(|item| {
                        let relation = item
                            .expr
                            .as_column()
                            .and_then(|c| find_named(&inner, c))
                            .and_then(|p| inner[p].0.clone());
                        (relation, item.alias.clone())
                    })
                    .collect()
            }
            LogicalPlan::SubqueryAlias { input, alias } => self
                .logical_columns(input)?
                .into_iter()
                .map(|(_, name)| (Some(alias.clone()), name))
                .collect(),
        })
    }
}

/// Subquery predicate that may become a semi or anti join
struct SemiShape<'p> {
    subquery: &'p LogicalPlan,
    probe: Option<&'p Expr>,
    anti: bool,
}

impl<'p> SemiShape<'p> {
    fn of(expr: &'p Expr) -> Option<Self> {
        match expr {
            Expr::Exists { subquery, negated } => Some(Self {
                subquery,
                probe: None,
                anti: *negated,
            }),
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => Some(Self {
                subquery,
                probe: Some(expr),
                anti: *negated,
            }),
            Expr::Not(inner) => Self::of(inner).map(|shape| Self {
                anti: !shape.anti,
                ..shape
            }),
            _ => None,
        }
    }
}

fn find_named(columns: &LogicalColumns, column: &ColumnRef) -> Option<usize> {
    columns.iter().position(|(relation, name)| {
        *name == column.column && (column.relation.is_none() || *relation == column.relation)
    })
}

/// Whether `expr` (or a subquery inside it) names one of `columns`
fn references(expr: &Expr, columns: &LogicalColumns) -> bool {
    rewrite::visible_refs(expr)
        .iter()
        .any(|c| find_named(columns, c).is_some())
}

fn is_null_of_join_key(
    conjunct: &Expr,
    on: &[Expr],
    left: &LogicalColumns,
    right: &LogicalColumns,
) -> bool {
    let Expr::IsNull(inner) = conjunct else {
        return false;
    };
    let Some(column) = inner.as_column() else {
        return false;
    };
    let Some(position) = find_named(right, column) else {
        return false;
    };
    if find_named(left, column).is_some() {
        return false;
    }
    on.iter().any(|c| match c {
        Expr::Binary {
            op: crate::ast::BinaryOp::Eq,
            left: a,
            right: b,
        } => {
            let is_key = |e: &Expr| e.as_column().and_then(|c| find_named(right, c)) == Some(position);
            let left_only = |e: &Expr| !e.contains_subquery() && !references(e, right);
            (is_key(a) && left_only(b)) || (is_key(b) && left_only(a))
        }
        _ => false,
    })
}

/// Split join conditions over `left ++ right` into equality keys and a
/// residual. Right key expressions are rebased onto the right row.
fn split_keys(
    conditions: Vec<PhysicalExpr>,
    left_width: usize,
) -> (Vec<(PhysicalExpr, PhysicalExpr)>, Vec<PhysicalExpr>) {
    let mut keys = Vec::new();
    let mut residual = Vec::new();
    for condition in conditions {
        if let PhysicalExpr::Binary {
            op: crate::ast::BinaryOp::Eq,
            left,
            right,
        } = &condition
        {
            if !condition.has_subquery() {
                match (left.column_span(), right.column_span()) {
                    (Some((_, hi)), Some((lo, _))) if hi < left_width && lo >= left_width => {
                        keys.push(((**left).clone(), right.rebased(left_width)));
                        continue;
                    }
                    (Some((lo, _)), Some((_, hi))) if hi < left_width && lo >= left_width => {
                        keys.push(((**right).clone(), left.rebased(left_width)));
                        continue;
                    }
                    _ => {}
                }
            }
        }
        residual.push(condition);
    }
    (keys, residual)
}

fn distinct_of(node: &PhysicalNode, expr: &PhysicalExpr) -> f64 {
    match expr {
        PhysicalExpr::Column(i) => node
            .schema
            .get(*i)
            .and_then(|c| c.distinct)
            .unwrap_or(node.estimated_rows),
        _ => node.estimated_rows,
    }
}

fn cap_distinct(schema: &mut [OutputColumn], rows: f64) {
    for column in schema {
        if let Some(d) = &mut column.distinct {
            *d = d.min(rows.max(1.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AggregateFunction, BinaryOp};
    use crate::storage::MemoryStore;
    use crate::types::{Column, Constraint, ObjectKind, QualifiedName, Row};

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
            let customers = catalog
                .create_table(
                    &store,
                    QualifiedName::new("memory", "main", "customers"),
                    vec![
                        Column::new("id", DataType::Integer, false, 0),
                        Column::new("name", DataType::Text, true, 0),
                    ],
                    vec![Constraint::PrimaryKey {
                        columns: vec!["id".into()],
                    }],
                )
                .unwrap();
            let orders = catalog
                .create_table(
                    &store,
                    QualifiedName::new("memory", "main", "orders"),
                    vec![
                        Column::new("id", DataType::Integer, false, 0),
                        Column::new("customer_id", DataType::Integer, true, 0),
                        Column::new("amount", DataType::Integer, true, 0),
                    ],
                    vec![],
                )
                .unwrap();
            store
                .insert(
                    customers,
                    (1..=3)
                        .map(|i| Row::new(vec![Value::Integer(i), Value::Text(format!("c{i}"))]))
                        .collect(),
                )
                .unwrap();
            store
                .insert(
                    orders,
                    (1..=6)
                        .map(|i| Row::new(vec![Value::Integer(i), Value::Integer(i % 2 + 1), Value::Integer(i * 10)]))
                        .collect(),
                )
                .unwrap();
            Self {
                catalog,
                store,
                session: Session::default(),
                config: EngineConfig::default(),
                cancel: CancellationToken::new(),
            }
        }

        fn plan(&self, logical: &LogicalPlan) -> Result<PhysicalPlan, DatabaseError> {
            Planner::new(&self.catalog, &self.session, &self.store, &self.config, &self.cancel).plan(logical)
        }
    }

    fn operators(plan: &PhysicalPlan) -> Vec<String> {
        plan.explain_tree().walk().iter().map(|n| n.operator.clone()).collect()
    }

    fn orders_of_customer() -> LogicalPlan {
        LogicalPlan::scan("orders", "o").filter(Expr::eq(Expr::col("o", "customer_id"), Expr::col("c", "id")))
    }

    #[test]
    fn test_single_table_filter_moves_into_scan() {
        let fixture = Fixture::new();
        let logical = LogicalPlan::scan("customers", "c")
            .filter(Expr::eq(Expr::col("c", "id"), Expr::lit(Value::Integer(2))));
        let plan = fixture.plan(&logical).unwrap();
        let root = plan.node(plan.root());
        assert!(matches!(root.operator, Operator::SeqScan { filter: Some(_), .. }));
        assert!(root.estimated_rows < 3.0);
    }

    #[test]
    fn test_correlated_exists_becomes_semi_join() {
        let fixture = Fixture::new();
        let logical = LogicalPlan::scan("customers", "c").filter(Expr::exists(orders_of_customer(), false));
        let plan = fixture.plan(&logical).unwrap();
        assert_eq!(operators(&plan)[0], "SemiJoin");
        assert!(plan.subqueries().is_empty());
        assert_eq!(plan.schema().len(), 2);
    }

    #[test]
    fn test_not_exists_becomes_anti_join() {
        let fixture = Fixture::new();
        let logical = LogicalPlan::scan("customers", "c").filter(Expr::exists(orders_of_customer(), true));
        let plan = fixture.plan(&logical).unwrap();
        assert_eq!(operators(&plan)[0], "AntiJoin");
    }

    #[test]
    fn test_left_join_is_null_becomes_anti_join() {
        let fixture = Fixture::new();
        let logical = LogicalPlan::scan("customers", "c")
            .join(
                LogicalPlan::scan("orders", "o"),
                JoinKind::Left,
                Some(Expr::eq(Expr::col("c", "id"), Expr::col("o", "customer_id"))),
            )
            .filter(Expr::col("o", "customer_id").is_null());
        let plan = fixture.plan(&logical).unwrap();
        let root = plan.node(plan.root());
        assert!(matches!(
            root.operator,
            Operator::Join {
                kind: PhysicalJoinKind::Anti,
                emit_right_nulls: true,
                ..
            }
        ));
        assert_eq!(root.schema.len(), 5);
    }

    #[test]
    fn test_not_in_over_nullable_column_stays_per_row() {
        let fixture = Fixture::new();
        let sub = LogicalPlan::scan("orders", "o").project(vec![(Expr::col("o", "customer_id"), "customer_id")]);
        let logical =
            LogicalPlan::scan("customers", "c").filter(Expr::in_subquery(Expr::col("c", "id"), sub, true));
        let plan = fixture.plan(&logical).unwrap();
        assert!(!operators(&plan).contains(&"AntiJoin".to_string()));
        assert_eq!(plan.subqueries().len(), 1);
    }

    #[test]
    fn test_scalar_aggregate_subquery_decorrelates() {
        let fixture = Fixture::new();
        let total = orders_of_customer().aggregate(vec![], vec![AggregateExpr {
            func: AggregateFunction::Count,
            arg: None,
            alias: "n".into(),
        }]);
        let logical = LogicalPlan::scan("customers", "c").project(vec![
            (Expr::col("c", "id"), "id"),
            (Expr::ScalarSubquery(Box::new(total)), "orders"),
        ]);
        let plan = fixture.plan(&logical).unwrap();
        let ops = operators(&plan);
        assert!(ops.contains(&"LeftJoin".to_string()));
        assert!(ops.contains(&"Materialize".to_string()));
        assert!(plan.subqueries().is_empty());
        assert_eq!(plan.schema()[1].data_type, DataType::Integer);
        assert!(!plan.schema()[1].nullable);
    }

    #[test]
    fn test_join_keys_are_split_from_residual() {
        let fixture = Fixture::new();
        let logical = LogicalPlan::scan("customers", "c").inner_join(
            LogicalPlan::scan("orders", "o"),
            Expr::eq(Expr::col("c", "id"), Expr::col("o", "customer_id")).and(Expr::binary(
                BinaryOp::Lt,
                Expr::col("c", "id"),
                Expr::col("o", "amount"),
            )),
        );
        let plan = fixture.plan(&logical).unwrap();
        let join = plan
            .nodes()
            .iter()
            .find_map(|n| match &n.operator {
                Operator::Join { keys, residual, .. } => Some((keys.len(), residual.is_some())),
                _ => None,
            })
            .unwrap();
        assert_eq!(join, (1, true));
        // Output keeps the written column order
        assert_eq!(plan.schema()[0].relation.as_deref(), Some("c"));
        assert_eq!(plan.schema()[2].relation.as_deref(), Some("o"));
    }

    #[test]
    fn test_unknown_column() {
        let fixture = Fixture::new();
        let logical = LogicalPlan::scan("customers", "c")
            .filter(Expr::eq(Expr::col("c", "missing"), Expr::lit(Value::Integer(1))));
        let err = fixture.plan(&logical).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(ObjectKind::Column, _)));
    }

    #[test]
    fn test_comparing_text_with_number_is_a_type_mismatch() {
        let fixture = Fixture::new();
        let logical = LogicalPlan::scan("customers", "c")
            .filter(Expr::eq(Expr::col("c", "name"), Expr::lit(Value::Integer(1))));
        assert!(matches!(fixture.plan(&logical), Err(DatabaseError::TypeMismatch(_))));
    }
}
