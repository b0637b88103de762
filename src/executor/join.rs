//! Join algorithms
//!
//! All four algorithms produce the same multiset of rows for a given join;
//! they differ only in how candidate pairs are found. Equality keys never
//! match on NULL.
use std::cmp::Ordering;
use std::collections::HashMap;

use super::conditions::ConditionEvaluator;
use super::queries::{QueryExecutor, Tuple, row_id_value};
use crate::planner::physical::{JoinAlgorithm, Operator, PhysicalExpr, PhysicalJoinKind, PhysicalNode};
use crate::types::{DatabaseError, Value, ValueKey};

struct JoinSetup<'p> {
    kind: PhysicalJoinKind,
    keys: &'p [(PhysicalExpr, PhysicalExpr)],
    residual: Option<&'p PhysicalExpr>,
    emit_right_nulls: bool,
    right_width: usize,
}

pub(super) fn execute<'a>(executor: &mut QueryExecutor<'a>, node: &'a PhysicalNode) -> Result<Vec<Tuple>, DatabaseError> {
    let Operator::Join {
        algorithm,
        kind,
        keys,
        residual,
        emit_right_nulls,
    } = &node.operator
    else {
        return Err(DatabaseError::Storage(format!("{} is not a join", node.operator.name())));
    };
    let plan = executor.plan();
    let (left_id, right_id) = (node.children[0], node.children[1]);
    let setup = JoinSetup {
        kind: *kind,
        keys,
        residual: residual.as_ref(),
        emit_right_nulls: *emit_right_nulls,
        right_width: plan.node(right_id).schema.len(),
    };

    let left = executor.run(left_id)?;
    if *algorithm == JoinAlgorithm::IndexNestedLoopJoin {
        if let Some(probe) = IndexProbe::new(plan.node(right_id), keys) {
            return index_nested_loop(executor, &setup, left, &probe);
        }
    }
    let right = executor.run(right_id)?;
    match algorithm {
        JoinAlgorithm::SortMergeJoin if setup.kind == PhysicalJoinKind::Inner && !keys.is_empty() => {
            sort_merge(executor, &setup, left, right)
        }
        JoinAlgorithm::NestedLoopJoin => nested_loop(executor, &setup, left, &right),
        _ if keys.is_empty() => nested_loop(executor, &setup, left, &right),
        _ => hash_join(executor, &setup, left, &right),
    }
}

fn key_values<'p>(
    executor: &mut QueryExecutor<'_>,
    row: &[Value],
    exprs: impl Iterator<Item = &'p PhysicalExpr>,
) -> Result<Option<Vec<ValueKey>>, DatabaseError> {
    let mut keys = Vec::new();
    for expr in exprs {
        let value = ConditionEvaluator::evaluate(expr, row, executor)?;
        if value.is_null() {
            return Ok(None);
        }
        keys.push(value.key());
    }
    Ok(Some(keys))
}

fn left_keys<'p>(setup: &JoinSetup<'p>) -> impl Iterator<Item = &'p PhysicalExpr> + 'p {
    setup.keys.iter().map(|(l, _)| l)
}

fn right_keys<'p>(setup: &JoinSetup<'p>) -> impl Iterator<Item = &'p PhysicalExpr> + 'p {
    setup.keys.iter().map(|(_, r)| r)
}

fn concat(left: &[Value], right: &[Value]) -> Tuple {
    let mut row = Vec::with_capacity(left.len() + right.len());
    row.extend_from_slice(left);
    row.extend_from_slice(right);
    row
}

fn residual_passes(
    executor: &mut QueryExecutor<'_>,
    setup: &JoinSetup<'_>,
    combined: &[Value],
) -> Result<bool, DatabaseError> {
    match setup.residual {
        Some(residual) => ConditionEvaluator::matches(residual, combined, executor),
        None => Ok(true),
    }
}

/// Emits the rows for one left row given its candidate right rows
fn emit_for_left(
    executor: &mut QueryExecutor<'_>,
    setup: &JoinSetup<'_>,
    left: Tuple,
    candidates: impl Iterator<Item = impl AsRef<[Value]>>,
    out: &mut Vec<Tuple>,
) -> Result<(), DatabaseError> {
    let mut matched = false;
    for right in candidates {
        executor.tick()?;
        let combined = concat(&left, right.as_ref());
        if !residual_passes(executor, setup, &combined)? {
            continue;
        }
        matched = true;
        match setup.kind {
            PhysicalJoinKind::Inner | PhysicalJoinKind::Left => out.push(combined),
            // One match decides semi and anti joins
            PhysicalJoinKind::Semi | PhysicalJoinKind::Anti => break,
        }
    }
    match setup.kind {
        PhysicalJoinKind::Left if !matched => out.push(pad_nulls(left, setup.right_width)),
        PhysicalJoinKind::Semi if matched => out.push(left),
        PhysicalJoinKind::Anti if !matched => {
            if setup.emit_right_nulls {
                out.push(pad_nulls(left, setup.right_width));
            } else {
                out.push(left);
            }
        }
        _ => {}
    }
    Ok(())
}

fn pad_nulls(mut row: Tuple, width: usize) -> Tuple {
    row.extend(std::iter::repeat_n(Value::Null, width));
    row
}

fn hash_join(
    executor: &mut QueryExecutor<'_>,
    setup: &JoinSetup<'_>,
    left: Vec<Tuple>,
    right: &[Tuple],
) -> Result<Vec<Tuple>, DatabaseError> {
    let mut table: HashMap<Vec<ValueKey>, Vec<usize>> = HashMap::new();
    for (i, row) in right.iter().enumerate() {
        executor.tick()?;
        if let Some(key) = key_values(executor, row, right_keys(setup))? {
            table.entry(key).or_default().push(i);
        }
    }

    let mut out = Vec::new();
    for row in left {
        let bucket = match key_values(executor, &row, left_keys(setup))? {
            Some(key) => table.get(&key).map_or(&[][..], Vec::as_slice),
            None => &[][..],
        };
        emit_for_left(executor, setup, row, bucket.iter().map(|i| &right[*i]), &mut out)?;
    }
    Ok(out)
}

fn nested_loop(
    executor: &mut QueryExecutor<'_>,
    setup: &JoinSetup<'_>,
    left: Vec<Tuple>,
    right: &[Tuple],
) -> Result<Vec<Tuple>, DatabaseError> {
    let mut right_keyed = Vec::with_capacity(right.len());
    for row in right {
        right_keyed.push(evaluate_all(executor, row, right_keys(setup))?);
    }

    let mut out = Vec::new();
    for row in left {
        let probe = evaluate_all(executor, &row, left_keys(setup))?;
        let mut candidates = Vec::new();
        for (i, keys) in right_keyed.iter().enumerate() {
            if keys_equal(&probe, keys)? {
                candidates.push(&right[i]);
            }
        }
        emit_for_left(executor, setup, row, candidates.into_iter(), &mut out)?;
    }
    Ok(out)
}

fn evaluate_all<'p>(
    executor: &mut QueryExecutor<'_>,
    row: &[Value],
    exprs: impl Iterator<Item = &'p PhysicalExpr>,
) -> Result<Vec<Value>, DatabaseError> {
    exprs
        .map(|e| ConditionEvaluator::evaluate(e, row, executor))
        .collect()
}

fn keys_equal(left: &[Value], right: &[Value]) -> Result<bool, DatabaseError> {
    for (l, r) in left.iter().zip(right) {
        if l.sql_cmp(r)? != Some(Ordering::Equal) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Inner side of an index nested-loop join: a base table probed by primary key
struct IndexProbe<'p> {
    handle: crate::types::TableHandle,
    column: usize,
    filter: Option<&'p PhysicalExpr>,
    with_row_id: bool,
}

impl<'p> IndexProbe<'p> {
    fn new(node: &'p PhysicalNode, keys: &[(PhysicalExpr, PhysicalExpr)]) -> Option<Self> {
        let Operator::SeqScan {
            handle,
            filter,
            with_row_id,
            ..
        } = &node.operator
        else {
            return None;
        };
        let [(_, PhysicalExpr::Column(column))] = keys else {
            return None;
        };
        Some(Self {
            handle: *handle,
            column: *column,
            filter: filter.as_ref(),
            with_row_id: *with_row_id,
        })
    }
}

fn index_nested_loop(
    executor: &mut QueryExecutor<'_>,
    setup: &JoinSetup<'_>,
    left: Vec<Tuple>,
    probe: &IndexProbe<'_>,
) -> Result<Vec<Tuple>, DatabaseError> {
    let store = executor.store();
    let mut out = Vec::new();
    for row in left {
        let mut candidates = Vec::new();
        let key = match setup.keys.first() {
            Some((left_key, _)) => ConditionEvaluator::evaluate(left_key, &row, executor)?,
            None => Value::Null,
        };
        if !key.is_null() {
            for (id, found) in store.lookup(probe.handle, probe.column, &key)? {
                let mut values = found.values;
                if probe.with_row_id {
                    values.push(row_id_value(id.0));
                }
                if let Some(filter) = probe.filter {
                    if !ConditionEvaluator::matches(filter, &values, executor)? {
                        continue;
                    }
                }
                candidates.push(values);
            }
        }
        emit_for_left(executor, setup, row, candidates.into_iter(), &mut out)?;
    }
    Ok(out)
}

/// Inner equi-join over both inputs sorted by key; output follows the
/// left key order
fn sort_merge(
    executor: &mut QueryExecutor<'_>,
    setup: &JoinSetup<'_>,
    left: Vec<Tuple>,
    right: Vec<Tuple>,
) -> Result<Vec<Tuple>, DatabaseError> {
    let mut left_sorted = Vec::with_capacity(left.len());
    for row in left {
        if let Some(key) = key_values(executor, &row, left_keys(setup))? {
            left_sorted.push((key, row));
        }
    }
    let mut right_sorted = Vec::with_capacity(right.len());
    for row in right {
        if let Some(key) = key_values(executor, &row, right_keys(setup))? {
            right_sorted.push((key, row));
        }
    }
    left_sorted.sort_by(|a, b| a.0.cmp(&b.0));
    right_sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = Vec::new();
    let mut start = 0;
    for (key, row) in left_sorted {
        while start < right_sorted.len() && right_sorted[start].0 < key {
            start += 1;
        }
        let end = right_sorted[start..]
            .iter()
            .position(|(k, _)| *k != key)
            .map_or(right_sorted.len(), |p| start + p);
        let group = right_sorted[start..end].iter().map(|(_, r)| r);
        emit_for_left(executor, setup, row, group, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::physical::{OutputColumn, PhysicalPlan};
    use crate::storage::MemoryStore;
    use crate::transaction::CancellationToken;
    use crate::types::DataType;

    fn values(rows: &[&[Option<i64>]]) -> PhysicalNode {
        let width = rows.first().map_or(1, |r| r.len());
        PhysicalNode {
            operator: Operator::Values {
                rows: rows
                    .iter()
                    .map(|r| r.iter().map(|v| v.map_or(Value::Null, Value::Integer)).collect())
                    .collect(),
            },
            schema: (0..width)
                .map(|i| OutputColumn::new(None, &format!("c{i}"), DataType::Integer, true))
                .collect(),
            estimated_rows: rows.len() as f64,
            children: vec![],
            ordering: vec![],
        }
    }

    fn run_join(algorithm: JoinAlgorithm, kind: PhysicalJoinKind, emit_right_nulls: bool) -> Vec<Tuple> {
        let mut plan = PhysicalPlan::new();
        let left = plan.push(values(&[&[Some(1)], &[Some(2)], &[None], &[Some(2)]]));
        let right = plan.push(values(&[&[Some(2), Some(20)], &[Some(3), Some(30)], &[Some(2), Some(21)], &[None, Some(0)]]));
        let join = plan.push(PhysicalNode {
            operator: Operator::Join {
                algorithm,
                kind,
                keys: vec![(PhysicalExpr::Column(0), PhysicalExpr::Column(0))],
                residual: None,
                emit_right_nulls,
            },
            schema: Vec::new(),
            estimated_rows: 0.0,
            children: vec![left, right],
            ordering: vec![],
        });
        plan.set_root(join);
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let mut rows = QueryExecutor::new(&plan, &store, &cancel, 64).execute().unwrap();
        rows.sort_by_key(|r| r.iter().map(Value::key).collect::<Vec<_>>());
        rows
    }

    #[test]
    fn test_algorithms_agree_on_inner_join() {
        let expected = run_join(JoinAlgorithm::HashJoin, PhysicalJoinKind::Inner, false);
        assert_eq!(expected.len(), 4);
        for algorithm in [JoinAlgorithm::NestedLoopJoin, JoinAlgorithm::SortMergeJoin] {
            assert_eq!(run_join(algorithm, PhysicalJoinKind::Inner, false), expected);
        }
    }

    #[test]
    fn test_left_join_pads_unmatched() {
        let rows = run_join(JoinAlgorithm::HashJoin, PhysicalJoinKind::Left, false);
        assert_eq!(rows.len(), 6);
        assert!(rows.contains(&vec![Value::Null, Value::Null, Value::Null]));
        assert!(rows.contains(&vec![Value::Integer(1), Value::Null, Value::Null]));
    }

    #[test]
    fn test_semi_and_anti_emit_left_once() {
        let semi = run_join(JoinAlgorithm::NestedLoopJoin, PhysicalJoinKind::Semi, false);
        assert_eq!(semi, vec![vec![Value::Integer(2)], vec![Value::Integer(2)]]);

        let anti = run_join(JoinAlgorithm::HashJoin, PhysicalJoinKind::Anti, false);
        assert_eq!(anti, vec![vec![Value::Null], vec![Value::Integer(1)]]);

        let padded = run_join(JoinAlgorithm::HashJoin, PhysicalJoinKind::Anti, true);
        assert!(padded.iter().all(|r| r.len() == 3));
    }
}
