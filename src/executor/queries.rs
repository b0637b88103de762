/// Physical plan execution
///
/// Every operator materializes its output. Subqueries left in expressions
/// run through [`QueryExecutor::subquery_rows`], memoized on the outer
/// values they are correlated with.
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::trace;

use super::conditions::ConditionEvaluator;
use super::join;
use crate::ast::{AggregateFunction, BinaryOp};
use crate::planner::physical::{NodeId, Operator, PhysicalAggregate, PhysicalExpr, PhysicalPlan};
use crate::storage::TableStore;
use crate::transaction::CancellationToken;
use crate::types::{DatabaseError, TableHandle, Value, ValueKey};

pub type Tuple = Vec<Value>;

pub struct QueryExecutor<'a> {
    plan: &'a PhysicalPlan,
    store: &'a dyn TableStore,
    cancel: &'a CancellationToken,
    check_interval: usize,
    ticks: usize,
    /// Rows the running subqueries are evaluated for, innermost last
    outer: Vec<Tuple>,
    subquery_cache: HashMap<(usize, Vec<ValueKey>), Rc<Vec<Tuple>>>,
    materialized: HashMap<NodeId, Rc<Vec<Tuple>>>,
    correlated: HashMap<NodeId, bool>,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(
        plan: &'a PhysicalPlan,
        store: &'a dyn TableStore,
        cancel: &'a CancellationToken,
        check_interval: usize,
    ) -> Self {
        Self {
            plan,
            store,
            cancel,
            check_interval: check_interval.max(1),
            ticks: 0,
            outer: Vec::new(),
            subquery_cache: HashMap::new(),
            materialized: HashMap::new(),
            correlated: HashMap::new(),
        }
    }

    /// Run the whole plan
    pub fn execute(&mut self) -> Result<Vec<Tuple>, DatabaseError> {
        let rows = self.run(self.plan.root())?;
        trace!(rows = rows.len(), "plan executed");
        Ok(rows)
    }

    pub(super) const fn store(&self) -> &'a dyn TableStore {
        self.store
    }

    pub(super) const fn plan(&self) -> &'a PhysicalPlan {
        self.plan
    }

    /// Count one unit of work, checking for cancellation periodically
    pub(super) fn tick(&mut self) -> Result<(), DatabaseError> {
        self.ticks += 1;
        if self.ticks % self.check_interval == 0 {
            self.cancel.check()?;
        }
        Ok(())
    }

    pub(super) fn run(&mut self, id: NodeId) -> Result<Vec<Tuple>, DatabaseError> {
        self.cancel.check()?;
        let plan = self.plan;
        let node = plan.node(id);
        match &node.operator {
            Operator::SeqScan {
                handle,
                filter,
                with_row_id,
                ..
            } => self.scan(*handle, filter.as_ref(), *with_row_id),
            Operator::Values { rows } => Ok(rows.clone()),
            Operator::Filter { predicate } => {
                let input = self.run(node.children[0])?;
                let mut out = Vec::new();
                for row in input {
                    self.tick()?;
                    if ConditionEvaluator::matches(predicate, &row, self)? {
                        out.push(row);
                    }
                }
                Ok(out)
            }
            Operator::Project { exprs } => {
                let input = self.run(node.children[0])?;
                let mut out = Vec::with_capacity(input.len());
                for row in input {
                    self.tick()?;
                    let mut projected = Vec::with_capacity(exprs.len());
                    for expr in exprs {
                        projected.push(ConditionEvaluator::evaluate(expr, &row, self)?);
                    }
                    out.push(projected);
                }
                Ok(out)
            }
            Operator::Join { .. } => join::execute(self, node),
            Operator::Aggregate { group_by, aggregates } => {
                let input = self.run(node.children[0])?;
                self.aggregate(input, group_by, aggregates)
            }
            Operator::Materialize => {
                let child = node.children[0];
                if self.is_correlated(child) {
                    return self.run(child);
                }
                if let Some(rows) = self.materialized.get(&id) {
                    return Ok(rows.as_ref().clone());
                }
                let rows = self.run(child)?;
                self.materialized.insert(id, Rc::new(rows.clone()));
                Ok(rows)
            }
        }
    }

    /// Rows of a table; with `with_row_id` the row id is appended as an integer
    pub(super) fn scan(
        &mut self,
        handle: TableHandle,
        filter: Option<&PhysicalExpr>,
        with_row_id: bool,
    ) -> Result<Vec<Tuple>, DatabaseError> {
        let store = self.store;
        let mut out = Vec::new();
        for (id, row) in store.scan(handle)? {
            self.tick()?;
            let mut values = row.values;
            if with_row_id {
                values.push(row_id_value(id.0));
            }
            if let Some(filter) = filter {
                if !ConditionEvaluator::matches(filter, &values, self)? {
                    continue;
                }
            }
            out.push(values);
        }
        Ok(out)
    }

    fn aggregate(
        &mut self,
        input: Vec<Tuple>,
        group_by: &[PhysicalExpr],
        aggregates: &[PhysicalAggregate],
    ) -> Result<Vec<Tuple>, DatabaseError> {
        let mut groups: BTreeMap<Vec<ValueKey>, (Tuple, Vec<Accumulator>)> = BTreeMap::new();
        let fresh = || aggregates.iter().map(|a| Accumulator::new(a.func)).collect::<Vec<_>>();

        for row in input {
            self.tick()?;
            let mut key_values = Vec::with_capacity(group_by.len());
            for expr in group_by {
                key_values.push(ConditionEvaluator::evaluate(expr, &row, self)?);
            }
            let key: Vec<ValueKey> = key_values.iter().map(Value::key).collect();
            let mut args = Vec::with_capacity(aggregates.len());
            for aggregate in aggregates {
                args.push(match &aggregate.arg {
                    Some(arg) => Some(ConditionEvaluator::evaluate(arg, &row, self)?),
                    None => None,
                });
            }
            let (_, accumulators) = groups.entry(key).or_insert_with(|| (key_values, fresh()));
            for (accumulator, arg) in accumulators.iter_mut().zip(args) {
                accumulator.update(arg)?;
            }
        }

        if groups.is_empty() && group_by.is_empty() {
            groups.insert(Vec::new(), (Vec::new(), fresh()));
        }
        Ok(groups
            .into_values()
            .map(|(mut values, accumulators)| {
                values.extend(accumulators.into_iter().map(Accumulator::finish));
                values
            })
            .collect())
    }

    /// Result rows of subquery `slot` evaluated for `row`
    pub fn subquery_rows(&mut self, slot: usize, row: &[Value]) -> Result<Rc<Vec<Tuple>>, DatabaseError> {
        let plan = self.plan;
        let subquery = plan.subquery(slot);
        let mut key = Vec::with_capacity(subquery.correlation.len());
        for (depth, index) in &subquery.correlation {
            let value = if *depth == 0 {
                row.get(*index).cloned().unwrap_or(Value::Null)
            } else {
                self.outer_value(depth - 1, *index)?
            };
            key.push(value.key());
        }
        if let Some(rows) = self.subquery_cache.get(&(slot, key.clone())) {
            return Ok(Rc::clone(rows));
        }

        self.outer.push(row.to_vec());
        let result = self.run(subquery.root);
        self.outer.pop();
        let rows = Rc::new(result?);
        self.subquery_cache.insert((slot, key), Rc::clone(&rows));
        Ok(rows)
    }

    /// Column `index` of the enclosing row `depth` levels out
    pub fn outer_value(&self, depth: usize, index: usize) -> Result<Value, DatabaseError> {
        self.outer
            .len()
            .checked_sub(depth + 1)
            .and_then(|level| self.outer[level].get(index))
            .cloned()
            .ok_or_else(|| DatabaseError::Storage(format!("no outer column {index} at depth {depth}")))
    }

    /// Whether anything under `id` reads an enclosing row
    fn is_correlated(&mut self, id: NodeId) -> bool {
        if let Some(known) = self.correlated.get(&id) {
            return *known;
        }
        let node = self.plan.node(id);
        let mut correlated = false;
        for expr in operator_exprs(&node.operator) {
            expr.visit_outer(&mut |_, _| correlated = true);
            correlated |= expr.has_subquery();
        }
        for child in &node.children {
            correlated |= self.is_correlated(*child);
        }
        self.correlated.insert(id, correlated);
        correlated
    }
}

pub(super) fn row_id_value(id: u64) -> Value {
    Value::Integer(i64::try_from(id).unwrap_or(i64::MAX))
}

fn operator_exprs(operator: &Operator) -> Vec<&PhysicalExpr> {
    match operator {
        Operator::SeqScan { filter, .. } => filter.iter().collect(),
        Operator::Filter { predicate } => vec![predicate],
        Operator::Project { exprs } => exprs.iter().collect(),
        Operator::Join { keys, residual, .. } => keys
            .iter()
            .flat_map(|(l, r)| [l, r])
            .chain(residual.iter())
            .collect(),
        Operator::Aggregate { group_by, aggregates } => group_by
            .iter()
            .chain(aggregates.iter().filter_map(|a| a.arg.as_ref()))
            .collect(),
        Operator::Values { .. } | Operator::Materialize => Vec::new(),
    }
}

enum Accumulator {
    Count(i64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: u64 },
}

impl Accumulator {
    const fn new(func: AggregateFunction) -> Self {
        match func {
            AggregateFunction::Count => Self::Count(0),
            AggregateFunction::Sum => Self::Sum(None),
            AggregateFunction::Min => Self::Min(None),
            AggregateFunction::Max => Self::Max(None),
            AggregateFunction::Avg => Self::Avg { sum: 0.0, count: 0 },
        }
    }

    /// `None` is COUNT(*)'s missing argument; NULL arguments are skipped
    fn update(&mut self, arg: Option<Value>) -> Result<(), DatabaseError> {
        match (self, arg) {
            (Self::Count(n), None) => *n += 1,
            (_, Some(Value::Null) | None) => {}
            (Self::Count(n), Some(_)) => *n += 1,
            (Self::Sum(acc), Some(value)) => {
                let value = match value {
                    Value::SmallInt(i) => Value::Integer(i64::from(i)),
                    other => other,
                };
                *acc = Some(match acc.take() {
                    None => value,
                    Some(sum) => ConditionEvaluator::apply_binary(BinaryOp::Plus, &sum, &value)?,
                });
            }
            (Self::Min(acc), Some(value)) => {
                if acc.as_ref().is_none_or(|m| value.sql_cmp(m).ok().flatten() == Some(Ordering::Less)) {
                    *acc = Some(value);
                }
            }
            (Self::Max(acc), Some(value)) => {
                if acc.as_ref().is_none_or(|m| value.sql_cmp(m).ok().flatten() == Some(Ordering::Greater)) {
                    *acc = Some(value);
                }
            }
            (Self::Avg { sum, count }, Some(value)) => {
                let x = value
                    .to_f64()
                    .ok_or_else(|| DatabaseError::TypeMismatch(format!("AVG of non-numeric value {value}")))?;
                *sum += x;
                *count += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Self::Count(n) => Value::Integer(n),
            Self::Sum(acc) | Self::Min(acc) | Self::Max(acc) => acc.unwrap_or(Value::Null),
            Self::Avg { count: 0, .. } => Value::Null,
            Self::Avg { sum, count } => Value::Real(sum / count as f64),
        }
    }
}
