/// Statistics estimator
///
/// Hands the planner table statistics (the catalog copy while it is fresh,
/// otherwise a recount into a private copy) and turns predicates into
/// selectivities. Column correlation is not modelled: conjuncts multiply.
use std::borrow::Cow;
use std::collections::HashSet;
use std::cmp::Ordering;

use tracing::debug;

use super::physical::PhysicalExpr;
use crate::ast::BinaryOp;
use crate::config::StatisticsConfig;
use crate::storage::TableStore;
use crate::transaction::CancellationToken;
use crate::types::{ColumnStatistics, DatabaseError, Table, TableStatistics, Value, ValueKey};

/// Fallback for predicates the rules below do not cover
pub const DEFAULT_SELECTIVITY: f64 = 1.0 / 3.0;
pub const LIKE_SELECTIVITY: f64 = 0.1;

pub struct StatisticsEstimator<'a> {
    store: &'a dyn TableStore,
    config: &'a StatisticsConfig,
    cancel: &'a CancellationToken,
    check_interval: usize,
}

impl<'a> StatisticsEstimator<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn TableStore,
        config: &'a StatisticsConfig,
        cancel: &'a CancellationToken,
        check_interval: usize,
    ) -> Self {
        Self {
            store,
            config,
            cancel,
            check_interval: check_interval.max(1),
        }
    }

    /// Statistics for planning. Never writes back to the catalog.
    pub fn estimate<'t>(&self, table: &'t Table) -> Result<Cow<'t, TableStatistics>, DatabaseError> {
        match &table.statistics {
            Some(stats) if !table.statistics_stale(self.config.staleness_ratio) => Ok(Cow::Borrowed(stats)),
            _ => {
                debug!(table = %table.name, modifications = table.modifications, "recounting stale statistics");
                Ok(Cow::Owned(self.compute(table)?))
            }
        }
    }

    /// Full recount through the store's scan
    pub fn compute(&self, table: &Table) -> Result<TableStatistics, DatabaseError> {
        let width = table.columns.len();
        let mut distinct: Vec<HashSet<ValueKey>> = vec![HashSet::new(); width];
        let mut nulls = vec![0u64; width];
        let mut mins: Vec<Option<Value>> = vec![None; width];
        let mut maxs: Vec<Option<Value>> = vec![None; width];
        let mut row_count = 0u64;

        for (i, (_, row)) in self.store.scan(table.handle)?.enumerate() {
            if i % self.check_interval == 0 {
                self.cancel.check()?;
            }
            row_count += 1;
            for (ordinal, value) in row.values.iter().enumerate().take(width) {
                if value.is_null() {
                    nulls[ordinal] += 1;
                    continue;
                }
                distinct[ordinal].insert(value.key());
                if mins[ordinal].as_ref().is_none_or(|m| matches!(value.sql_cmp(m), Ok(Some(Ordering::Less)))) {
                    mins[ordinal] = Some(value.clone());
                }
                if maxs[ordinal].as_ref().is_none_or(|m| matches!(value.sql_cmp(m), Ok(Some(Ordering::Greater)))) {
                    maxs[ordinal] = Some(value.clone());
                }
            }
        }

        let columns = (0..width)
            .map(|ordinal| ColumnStatistics {
                distinct_count: distinct[ordinal].len() as u64,
                null_fraction: if row_count == 0 {
                    0.0
                } else {
                    nulls[ordinal] as f64 / row_count as f64
                },
                min: mins[ordinal].take(),
                max: maxs[ordinal].take(),
            })
            .collect();

        Ok(TableStatistics { row_count, columns })
    }
}

/// Selectivity of `predicate` over a relation whose column `i` is described
/// by `columns[i]`. Always within `[0, 1]`.
#[must_use]
pub fn estimate_selectivity(predicate: &PhysicalExpr, columns: &[ColumnStatistics]) -> f64 {
    selectivity(predicate, columns).clamp(0.0, 1.0)
}

fn selectivity(predicate: &PhysicalExpr, columns: &[ColumnStatistics]) -> f64 {
    match predicate {
        PhysicalExpr::Binary { op: BinaryOp::And, left, right } => {
            selectivity(left, columns) * selectivity(right, columns)
        }
        PhysicalExpr::Binary { op: BinaryOp::Or, left, right } => {
            let a = selectivity(left, columns);
            let b = selectivity(right, columns);
            a + b - a * b
        }
        PhysicalExpr::Not(inner) => 1.0 - selectivity(inner, columns),
        PhysicalExpr::Binary { op: BinaryOp::Like, .. } => LIKE_SELECTIVITY,
        PhysicalExpr::Binary { op, left, right } if op.is_comparison() => {
            comparison(*op, left, right, columns)
        }
        PhysicalExpr::IsNull(inner) => column_of(inner, columns).map_or(DEFAULT_SELECTIVITY, |c| c.null_fraction),
        PhysicalExpr::IsNotNull(inner) => {
            column_of(inner, columns).map_or(1.0 - DEFAULT_SELECTIVITY, |c| 1.0 - c.null_fraction)
        }
        PhysicalExpr::InList { expr, list, negated } => {
            let s = column_of(expr, columns).map_or(DEFAULT_SELECTIVITY, |c| {
                let k = list.len() as f64;
                (k / distinct(c)).min(1.0) * (1.0 - c.null_fraction)
            });
            if *negated { 1.0 - s } else { s }
        }
        PhysicalExpr::Literal(Value::Boolean(true)) => 1.0,
        PhysicalExpr::Literal(_) => 0.0,
        _ => DEFAULT_SELECTIVITY,
    }
}

fn comparison(op: BinaryOp, left: &PhysicalExpr, right: &PhysicalExpr, columns: &[ColumnStatistics]) -> f64 {
    // Normalize to `column op literal`
    let (column, literal, op) = match (left, right) {
        (PhysicalExpr::Column(i), PhysicalExpr::Literal(v)) => (*i, v, op),
        (PhysicalExpr::Literal(v), PhysicalExpr::Column(i)) => (*i, v, op.flipped()),
        (PhysicalExpr::Column(a), PhysicalExpr::Column(b)) if op == BinaryOp::Eq => {
            let da = columns.get(*a).map_or(1.0, distinct);
            let db = columns.get(*b).map_or(1.0, distinct);
            return 1.0 / da.max(db);
        }
        _ => return DEFAULT_SELECTIVITY,
    };
    let Some(stats) = columns.get(column) else {
        return DEFAULT_SELECTIVITY;
    };
    if literal.is_null() {
        return 0.0;
    }
    let non_null = 1.0 - stats.null_fraction;

    match op {
        BinaryOp::Eq => non_null / distinct(stats),
        BinaryOp::NotEq => non_null * (1.0 - 1.0 / distinct(stats)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            range_fraction(op, literal, stats).map_or(DEFAULT_SELECTIVITY, |f| f * non_null)
        }
        _ => DEFAULT_SELECTIVITY,
    }
}

/// Linear interpolation between the observed min and max
fn range_fraction(op: BinaryOp, literal: &Value, stats: &ColumnStatistics) -> Option<f64> {
    let min = stats.min.as_ref()?.ordinal()?;
    let max = stats.max.as_ref()?.ordinal()?;
    let v = literal.ordinal()?;
    let below = if max > min {
        ((v - min) / (max - min)).clamp(0.0, 1.0)
    } else if v < min {
        0.0
    } else if v > max {
        1.0
    } else {
        // Single observed value and the literal is it
        match op {
            BinaryOp::LtEq | BinaryOp::GtEq => return Some(1.0),
            _ => return Some(0.0),
        }
    };
    Some(match op {
        BinaryOp::Lt | BinaryOp::LtEq => below,
        _ => 1.0 - below,
    })
}

fn column_of<'c>(expr: &PhysicalExpr, columns: &'c [ColumnStatistics]) -> Option<&'c ColumnStatistics> {
    match expr {
        PhysicalExpr::Column(i) => columns.get(*i),
        _ => None,
    }
}

fn distinct(stats: &ColumnStatistics) -> f64 {
    stats.distinct_count.max(1) as f64
}
