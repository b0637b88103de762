/// Logical-level helpers for subquery rewrites
///
/// Correlation is decided by alias: a column reference inside a subquery is
/// correlated when it names a relation the subquery does not introduce.
use std::collections::HashSet;

use crate::ast::{AggregateExpr, AggregateFunction, BinaryOp, ColumnRef, Expr, JoinKind, LogicalPlan, split_conjunction};

/// Subquery plans nested directly inside `expr`
#[must_use]
pub fn nested_subqueries(expr: &Expr) -> Vec<&LogicalPlan> {
    let mut out = Vec::new();
    collect_subqueries(expr, &mut out);
    out
}

fn collect_subqueries<'a>(expr: &'a Expr, out: &mut Vec<&'a LogicalPlan>) {
    match expr {
        Expr::Exists { subquery, .. } | Expr::ScalarSubquery(subquery) => out.push(subquery),
        Expr::InSubquery { expr, subquery, .. } => {
            collect_subqueries(expr, out);
            out.push(subquery);
        }
        Expr::Column(_) | Expr::Literal(_) => {}
        Expr::Binary { left, right, .. } => {
            collect_subqueries(left, out);
            collect_subqueries(right, out);
        }
        Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => collect_subqueries(e, out),
        Expr::InList { expr, list, .. } => {
            collect_subqueries(expr, out);
            for item in list {
                collect_subqueries(item, out);
            }
        }
        Expr::Coalesce(args) => {
            for arg in args {
                collect_subqueries(arg, out);
            }
        }
    }
}

/// Every expression held directly by `plan`'s own nodes
fn plan_exprs(plan: &LogicalPlan) -> Vec<&Expr> {
    let mut out = Vec::new();
    collect_plan_exprs(plan, &mut out);
    out
}

fn collect_plan_exprs<'a>(plan: &'a LogicalPlan, out: &mut Vec<&'a Expr>) {
    match plan {
        LogicalPlan::Scan { .. } | LogicalPlan::Values { .. } => {}
        LogicalPlan::Filter { input, predicate } => {
            out.push(predicate);
            collect_plan_exprs(input, out);
        }
        LogicalPlan::Join { left, right, on, .. } => {
            out.extend(on.iter());
            collect_plan_exprs(left, out);
            collect_plan_exprs(right, out);
        }
        LogicalPlan::SemiJoin { left, right, on } | LogicalPlan::AntiJoin { left, right, on } => {
            out.push(on);
            collect_plan_exprs(left, out);
            collect_plan_exprs(right, out);
        }
        LogicalPlan::Aggregate {
            input,
            group_by,
            aggregates,
        } => {
            out.extend(group_by.iter());
            out.extend(aggregates.iter().filter_map(|a| a.arg.as_ref()));
            collect_plan_exprs(input, out);
        }
        LogicalPlan::Project { input, items } => {
            out.extend(items.iter().map(|i| &i.expr));
            collect_plan_exprs(input, out);
        }
        LogicalPlan::SubqueryAlias { input, .. } => collect_plan_exprs(input, out),
    }
}

/// Column references of `expr` naming relations outside `bound`, including
/// those made from inside nested subqueries
pub fn free_refs_of_expr(expr: &Expr, bound: &HashSet<String>, out: &mut Vec<ColumnRef>) {
    let mut columns = Vec::new();
    expr.collect_columns(&mut columns);
    for column in columns {
        if column.relation.as_ref().is_some_and(|r| !bound.contains(r)) {
            out.push(column.clone());
        }
    }
    for subquery in nested_subqueries(expr) {
        for column in free_refs(subquery) {
            if column.relation.as_ref().is_some_and(|r| !bound.contains(r)) {
                out.push(column);
            }
        }
    }
}

/// References `plan` makes to relations it does not introduce itself
#[must_use]
pub fn free_refs(plan: &LogicalPlan) -> Vec<ColumnRef> {
    let bound: HashSet<String> = plan.relation_aliases().into_iter().collect();
    let mut out = Vec::new();
    for expr in plan_exprs(plan) {
        free_refs_of_expr(expr, &bound, &mut out);
    }
    out
}

/// Column references of a predicate as seen by the enclosing query: its own
/// columns plus whatever nested subqueries reach out for
#[must_use]
pub fn visible_refs(expr: &Expr) -> Vec<ColumnRef> {
    let mut out: Vec<ColumnRef> = Vec::new();
    let mut columns = Vec::new();
    expr.collect_columns(&mut columns);
    out.extend(columns.into_iter().cloned());
    for subquery in nested_subqueries(expr) {
        out.extend(free_refs(subquery));
    }
    out
}

/// Subquery split into an uncorrelated body and the predicates that tied it
/// to the outer query
#[derive(Debug, Clone)]
pub struct Decorrelated {
    pub body: LogicalPlan,
    pub correlation: Vec<Expr>,
    /// Single output expression over `body`; `None` means column 0
    pub output: Option<Expr>,
}

/// Pull correlation predicates out of the filters of `subquery`.
///
/// Predicates are lifted only through Project, Filter and inner joins.
/// Returns `None` when anything correlated is left behind.
#[must_use]
pub fn decorrelate(subquery: &LogicalPlan, wants_output: bool) -> Option<Decorrelated> {
    let bound: HashSet<String> = subquery.relation_aliases().into_iter().collect();
    let (body, output) = match subquery {
        LogicalPlan::Project { input, items } if items.len() == 1 => {
            ((**input).clone(), Some(items[0].expr.clone()))
        }
        LogicalPlan::Project { input, .. } if !wants_output => ((**input).clone(), None),
        other => (other.clone(), None),
    };

    let mut correlation = Vec::new();
    let body = lift(body, &bound, &mut correlation);

    if correlation.iter().any(Expr::contains_subquery) {
        return None;
    }
    if !free_refs(&body).is_empty() {
        return None;
    }
    if let Some(output) = &output {
        let mut leftover = Vec::new();
        free_refs_of_expr(output, &bound, &mut leftover);
        if !leftover.is_empty() {
            return None;
        }
    }
    Some(Decorrelated {
        body,
        correlation,
        output,
    })
}

fn is_correlated(expr: &Expr, bound: &HashSet<String>) -> bool {
    let mut refs = Vec::new();
    free_refs_of_expr(expr, bound, &mut refs);
    !refs.is_empty()
}

fn lift(plan: LogicalPlan, bound: &HashSet<String>, correlation: &mut Vec<Expr>) -> LogicalPlan {
    match plan {
        LogicalPlan::Filter { input, predicate } => {
            let input = lift(*input, bound, correlation);
            let mut kept = Vec::new();
            for conjunct in split_conjunction(predicate) {
                if is_correlated(&conjunct, bound) {
                    correlation.push(conjunct);
                } else {
                    kept.push(conjunct);
                }
            }
            match crate::ast::conjoin(kept) {
                Some(predicate) => LogicalPlan::Filter {
                    input: Box::new(input),
                    predicate,
                },
                None => input,
            }
        }
        LogicalPlan::Join {
            left,
            right,
            kind: kind @ (JoinKind::Inner | JoinKind::Cross),
            on,
        } => {
            let left = lift(*left, bound, correlation);
            let right = lift(*right, bound, correlation);
            let mut kept = Vec::new();
            for conjunct in on.map(split_conjunction).unwrap_or_default() {
                if is_correlated(&conjunct, bound) {
                    correlation.push(conjunct);
                } else {
                    kept.push(conjunct);
                }
            }
            LogicalPlan::Join {
                left: Box::new(left),
                right: Box::new(right),
                kind,
                on: crate::ast::conjoin(kept),
            }
        }
        LogicalPlan::Project { input, items } => LogicalPlan::Project {
            input: Box::new(lift(*input, bound, correlation)),
            items,
        },
        other => other,
    }
}

/// Correlated aggregate scalar subquery `(SELECT agg(x) FROM r WHERE r.k = outer.k AND ...)`
#[derive(Debug, Clone)]
pub struct AggregateSubquery {
    pub body: LogicalPlan,
    pub aggregate: AggregateExpr,
    /// `(inner column, outer expression)` equality pairs
    pub keys: Vec<(ColumnRef, Expr)>,
}

#[must_use]
pub fn match_aggregate_subquery(subquery: &LogicalPlan) -> Option<AggregateSubquery> {
    let aggregate_plan = match subquery {
        LogicalPlan::Project { input, items } if items.len() == 1 => match (&items[0].expr, &**input) {
            (Expr::Column(c), agg @ LogicalPlan::Aggregate { aggregates, .. })
                if aggregates.len() == 1 && c.column == aggregates[0].alias =>
            {
                agg
            }
            _ => return None,
        },
        agg @ LogicalPlan::Aggregate { .. } => agg,
        _ => return None,
    };
    let LogicalPlan::Aggregate {
        input,
        group_by,
        aggregates,
    } = aggregate_plan
    else {
        return None;
    };
    if !group_by.is_empty() || aggregates.len() != 1 {
        return None;
    }

    let bound: HashSet<String> = input.relation_aliases().into_iter().collect();
    let mut correlation = Vec::new();
    let body = lift((**input).clone(), &bound, &mut correlation);
    if correlation.is_empty() || !free_refs(&body).is_empty() {
        return None;
    }
    if let Some(arg) = &aggregates[0].arg {
        if is_correlated(arg, &bound) {
            return None;
        }
    }

    let mut keys = Vec::new();
    for conjunct in correlation {
        let Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } = conjunct
        else {
            return None;
        };
        let (inner, outer) = match (*left, *right) {
            (Expr::Column(c), outer) if c.relation.as_ref().is_some_and(|r| bound.contains(r)) => (c, outer),
            (outer, Expr::Column(c)) if c.relation.as_ref().is_some_and(|r| bound.contains(r)) => (c, outer),
            _ => return None,
        };
        // The outer side must not mention the subquery's own relations
        let mut outer_cols = Vec::new();
        outer.collect_columns(&mut outer_cols);
        if outer.contains_subquery()
            || outer_cols
                .iter()
                .any(|c| c.relation.as_ref().is_none_or(|r| bound.contains(r)))
        {
            return None;
        }
        keys.push((inner, outer));
    }

    // Group columns are exposed by name, so they must not collide
    let mut names = HashSet::new();
    if !keys.iter().all(|(c, _)| names.insert(c.column.clone())) {
        return None;
    }

    Some(AggregateSubquery {
        body,
        aggregate: aggregates[0].clone(),
        keys,
    })
}

/// Whether the aggregate yields 0 rather than NULL over no rows
#[must_use]
pub const fn counts(func: AggregateFunction) -> bool {
    matches!(func, AggregateFunction::Count)
}
