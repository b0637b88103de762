//! Name resolution and type inference for expressions
use std::collections::BTreeSet;

use super::Planner;
use super::physical::{OutputColumn, PhysicalExpr, SubqueryKind, SubqueryPlan};
use crate::ast::{AggregateFunction, BinaryOp, ColumnRef, Expr, LogicalPlan};
use crate::types::{DataType, DatabaseError, ObjectKind};

/// Resolved expression and its inferred type. `data_type` is `None` only
/// for an untyped NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed {
    pub expr: PhysicalExpr,
    pub data_type: Option<DataType>,
    pub nullable: bool,
}

impl Typed {
    /// Type to give an output column; a bare NULL becomes TEXT
    #[must_use]
    pub fn column_type(&self) -> DataType {
        self.data_type.clone().unwrap_or(DataType::Text)
    }
}

/// Identifier for a subquery result shared by several expressions
pub(super) struct ScalarSlot {
    plan: LogicalPlan,
    scope: Vec<OutputColumn>,
    depth: usize,
    slot: usize,
}

impl ScalarSlot {
    pub(super) const fn slot(&self) -> usize {
        self.slot
    }
}

/// Position of `column` in `schema`. Columns from `prefer_from` on are
/// searched first, so a subquery's own relations shadow the ones it is
/// joined to.
pub fn find_column(
    schema: &[OutputColumn],
    prefer_from: usize,
    column: &ColumnRef,
) -> Result<Option<usize>, DatabaseError> {
    let matches =
        |c: &OutputColumn| c.name == column.column && (column.relation.is_none() || c.relation == column.relation);
    let split = prefer_from.min(schema.len());
    for (start, end) in [(split, schema.len()), (0, split)] {
        let mut found = schema[start..end]
            .iter()
            .enumerate()
            .filter(|(_, c)| matches(c))
            .map(|(i, _)| start + i);
        if let Some(first) = found.next() {
            if found.next().is_some() {
                return Err(DatabaseError::PlanningError(format!(
                    "column reference '{column}' is ambiguous"
                )));
            }
            return Ok(Some(first));
        }
    }
    Ok(None)
}

#[derive(PartialEq, Eq)]
enum Family {
    Numeric,
    Text,
    Boolean,
    Date,
    Timestamp,
}

fn family(data_type: &DataType) -> Family {
    match data_type {
        t if t.is_numeric() => Family::Numeric,
        t if t.is_textual() => Family::Text,
        DataType::Boolean => Family::Boolean,
        DataType::Date => Family::Date,
        _ => Family::Timestamp,
    }
}

/// Comparing two values of these types is defined
pub fn check_comparable(left: &Typed, right: &Typed) -> Result<(), DatabaseError> {
    match (&left.data_type, &right.data_type) {
        (Some(a), Some(b)) if family(a) != family(b) => {
            Err(DatabaseError::TypeMismatch(format!("cannot compare {a} with {b}")))
        }
        _ => Ok(()),
    }
}

pub fn expect_boolean(typed: &Typed, context: &str) -> Result<(), DatabaseError> {
    match &typed.data_type {
        None | Some(DataType::Boolean) => Ok(()),
        Some(other) => Err(DatabaseError::TypeMismatch(format!(
            "{context} expects a boolean, got {other}"
        ))),
    }
}

fn expect_numeric(typed: &Typed, context: &str) -> Result<(), DatabaseError> {
    match &typed.data_type {
        Some(t) if !t.is_numeric() => Err(DatabaseError::TypeMismatch(format!(
            "{context} expects a number, got {t}"
        ))),
        _ => Ok(()),
    }
}

fn binary_type(op: BinaryOp, left: &Typed, right: &Typed) -> Result<Option<DataType>, DatabaseError> {
    match op {
        BinaryOp::And | BinaryOp::Or => {
            expect_boolean(left, "AND/OR")?;
            expect_boolean(right, "AND/OR")?;
            Ok(Some(DataType::Boolean))
        }
        BinaryOp::Like => {
            for side in [left, right] {
                if let Some(t) = &side.data_type {
                    if !t.is_textual() {
                        return Err(DatabaseError::TypeMismatch(format!("LIKE expects text, got {t}")));
                    }
                }
            }
            Ok(Some(DataType::Boolean))
        }
        op if op.is_comparison() => {
            check_comparable(left, right)?;
            Ok(Some(DataType::Boolean))
        }
        _ => {
            expect_numeric(left, "arithmetic")?;
            expect_numeric(right, "arithmetic")?;
            Ok(match (&left.data_type, &right.data_type) {
                (Some(a), Some(b)) => Some(a.numeric_supertype(b)),
                (Some(t), None) | (None, Some(t)) => Some(t.clone()),
                (None, None) => None,
            })
        }
    }
}

/// Result type and nullability of an aggregate over `arg`
pub fn aggregate_type(
    func: AggregateFunction,
    arg: Option<&Typed>,
) -> Result<(DataType, bool), DatabaseError> {
    if func == AggregateFunction::Count {
        return Ok((DataType::Integer, false));
    }
    let Some(arg) = arg else {
        return Err(DatabaseError::PlanningError(format!(
            "{func:?} requires an argument"
        )));
    };
    match func {
        AggregateFunction::Sum => {
            expect_numeric(arg, "SUM")?;
            let data_type = match arg.data_type.clone().unwrap_or(DataType::Integer) {
                DataType::SmallInt | DataType::Integer => DataType::Integer,
                DataType::Numeric { scale, .. } => DataType::Numeric { precision: 38, scale },
                other => other,
            };
            Ok((data_type, true))
        }
        AggregateFunction::Avg => {
            expect_numeric(arg, "AVG")?;
            Ok((DataType::Real, true))
        }
        _ => Ok((arg.column_type(), true)),
    }
}

impl Planner<'_> {
    /// Resolve `expr` against `schema`, falling back to the enclosing
    /// subquery scopes for names the schema does not have
    pub(super) fn resolve(
        &mut self,
        expr: &Expr,
        schema: &[OutputColumn],
        prefer_from: usize,
    ) -> Result<Typed, DatabaseError> {
        match expr {
            Expr::Column(column) => self.resolve_column(column, schema, prefer_from),
            Expr::Literal(value) => Ok(Typed {
                expr: PhysicalExpr::Literal(value.clone()),
                data_type: value.data_type(),
                nullable: value.is_null(),
            }),
            Expr::Binary { op, left, right } => {
                let left = self.resolve(left, schema, prefer_from)?;
                let right = self.resolve(right, schema, prefer_from)?;
                let data_type = binary_type(*op, &left, &right)?;
                Ok(Typed {
                    nullable: left.nullable || right.nullable,
                    expr: PhysicalExpr::binary(*op, left.expr, right.expr),
                    data_type,
                })
            }
            Expr::Not(inner) => {
                let inner = self.resolve(inner, schema, prefer_from)?;
                expect_boolean(&inner, "NOT")?;
                Ok(Typed {
                    expr: PhysicalExpr::Not(Box::new(inner.expr)),
                    data_type: Some(DataType::Boolean),
                    nullable: inner.nullable,
                })
            }
            Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
                let inner = Box::new(self.resolve(inner, schema, prefer_from)?.expr);
                Ok(Typed {
                    expr: if matches!(expr, Expr::IsNull(_)) {
                        PhysicalExpr::IsNull(inner)
                    } else {
                        PhysicalExpr::IsNotNull(inner)
                    },
                    data_type: Some(DataType::Boolean),
                    nullable: false,
                })
            }
            Expr::InList { expr, list, negated } => {
                let probe = self.resolve(expr, schema, prefer_from)?;
                let mut nullable = probe.nullable;
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    let item = self.resolve(item, schema, prefer_from)?;
                    check_comparable(&probe, &item)?;
                    nullable |= item.nullable;
                    items.push(item.expr);
                }
                Ok(Typed {
                    expr: PhysicalExpr::InList {
                        expr: Box::new(probe.expr),
                        list: items,
                        negated: *negated,
                    },
                    data_type: Some(DataType::Boolean),
                    nullable,
                })
            }
            Expr::Coalesce(args) => {
                if args.is_empty() {
                    return Err(DatabaseError::PlanningError("COALESCE needs at least one argument".into()));
                }
                let mut resolved: Vec<Typed> = Vec::with_capacity(args.len());
                for arg in args {
                    let arg = self.resolve(arg, schema, prefer_from)?;
                    if let Some(first) = resolved.first() {
                        check_comparable(first, &arg)?;
                    }
                    resolved.push(arg);
                }
                let data_type = resolved.iter().find_map(|t| t.data_type.clone());
                let nullable = resolved.iter().all(|t| t.nullable);
                Ok(Typed {
                    expr: PhysicalExpr::Coalesce(resolved.into_iter().map(|t| t.expr).collect()),
                    data_type,
                    nullable,
                })
            }
            Expr::Exists { subquery, negated } => {
                let slot = self.plan_subquery(subquery, schema, SubqueryKind::Exists)?;
                Ok(Typed {
                    expr: PhysicalExpr::Exists { slot, negated: *negated },
                    data_type: Some(DataType::Boolean),
                    nullable: false,
                })
            }
            Expr::InSubquery { expr, subquery, negated } => {
                let probe = self.resolve(expr, schema, prefer_from)?;
                let slot = self.plan_subquery(subquery, schema, SubqueryKind::In)?;
                let column = self.subquery_column(slot);
                check_comparable(&probe, &column)?;
                Ok(Typed {
                    expr: PhysicalExpr::InSubquery {
                        expr: Box::new(probe.expr),
                        slot,
                        negated: *negated,
                    },
                    data_type: Some(DataType::Boolean),
                    nullable: true,
                })
            }
            Expr::ScalarSubquery(subquery) => {
                let depth = self.outer.len();
                let existing = self
                    .scalar_slots
                    .iter()
                    .find(|s| s.depth == depth && s.plan == **subquery && s.scope == schema)
                    .map(|s| s.slot);
                let slot = match existing {
                    Some(slot) => slot,
                    None => {
                        let slot = self.plan_subquery(subquery, schema, SubqueryKind::Scalar)?;
                        self.scalar_slots.push(ScalarSlot {
                            plan: (**subquery).clone(),
                            scope: schema.to_vec(),
                            depth,
                            slot,
                        });
                        slot
                    }
                };
                let column = self.subquery_column(slot);
                Ok(Typed {
                    expr: PhysicalExpr::ScalarSubquery { slot },
                    data_type: column.data_type,
                    nullable: true,
                })
            }
        }
    }

    fn resolve_column(
        &mut self,
        column: &ColumnRef,
        schema: &[OutputColumn],
        prefer_from: usize,
    ) -> Result<Typed, DatabaseError> {
        if let Some(index) = find_column(schema, prefer_from, column)? {
            let found = &schema[index];
            return Ok(Typed {
                expr: PhysicalExpr::Column(index),
                data_type: Some(found.data_type.clone()),
                nullable: found.nullable,
            });
        }
        for level in (0..self.outer.len()).rev() {
            if let Some(index) = find_column(&self.outer[level], 0, column)? {
                let depth = self.outer.len() - 1 - level;
                // Every subquery opened at or inside `level` now depends on it
                for (open, captured) in self.captures.iter_mut().enumerate().skip(level) {
                    captured.insert((open - level, index));
                }
                let found = &self.outer[level][index];
                return Ok(Typed {
                    expr: PhysicalExpr::OuterColumn { depth, index },
                    data_type: Some(found.data_type.clone()),
                    nullable: found.nullable,
                });
            }
        }
        Err(DatabaseError::NotFound(ObjectKind::Column, column.to_string()))
    }

    /// Lower `subquery` as a per-row subquery evaluated for rows of `scope`
    fn plan_subquery(
        &mut self,
        subquery: &LogicalPlan,
        scope: &[OutputColumn],
        kind: SubqueryKind,
    ) -> Result<usize, DatabaseError> {
        self.outer.push(scope.to_vec());
        self.captures.push(BTreeSet::new());
        let lowered = self.lower(subquery, Vec::new());
        self.outer.pop();
        let captured = self.captures.pop().unwrap_or_default();
        let root = lowered?;

        if kind != SubqueryKind::Exists && self.plan.node(root).schema.len() != 1 {
            return Err(DatabaseError::PlanningError(
                "subquery must return exactly one column".into(),
            ));
        }
        Ok(self.plan.add_subquery(SubqueryPlan {
            root,
            kind,
            correlation: captured.into_iter().collect(),
        }))
    }

    fn subquery_column(&self, slot: usize) -> Typed {
        let root = self.plan.subquery(slot).root;
        let column = &self.plan.node(root).schema[0];
        Typed {
            expr: PhysicalExpr::Column(0),
            data_type: Some(column.data_type.clone()),
            nullable: column.nullable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<OutputColumn> {
        vec![
            OutputColumn::new(Some("c"), "id", DataType::Integer, false),
            OutputColumn::new(Some("o"), "id", DataType::Integer, false),
            OutputColumn::new(Some("o"), "total", DataType::Real, true),
        ]
    }

    #[test]
    fn test_find_column_by_relation() {
        let schema = schema();
        assert_eq!(find_column(&schema, 0, &ColumnRef::new("o", "id")).unwrap(), Some(1));
        assert_eq!(find_column(&schema, 0, &ColumnRef::bare("total")).unwrap(), Some(2));
        assert_eq!(find_column(&schema, 0, &ColumnRef::new("x", "id")).unwrap(), None);
    }

    #[test]
    fn test_bare_name_ambiguity() {
        let schema = schema();
        let err = find_column(&schema, 0, &ColumnRef::bare("id")).unwrap_err();
        assert!(matches!(err, DatabaseError::PlanningError(_)));
        // The preferred half shadows the rest
        assert_eq!(find_column(&schema, 1, &ColumnRef::bare("id")).unwrap(), Some(1));
        assert!(find_column(&schema, 2, &ColumnRef::bare("id")).is_err());
    }

    #[test]
    fn test_sum_widens_small_ints() {
        let arg = Typed {
            expr: PhysicalExpr::Column(0),
            data_type: Some(DataType::SmallInt),
            nullable: false,
        };
        assert_eq!(
            aggregate_type(AggregateFunction::Sum, Some(&arg)).unwrap(),
            (DataType::Integer, true)
        );
        assert_eq!(
            aggregate_type(AggregateFunction::Count, None).unwrap(),
            (DataType::Integer, false)
        );
        assert_eq!(aggregate_type(AggregateFunction::Avg, Some(&arg)).unwrap().0, DataType::Real);
    }

    #[test]
    fn test_text_and_number_do_not_compare() {
        let text = Typed {
            expr: PhysicalExpr::Column(0),
            data_type: Some(DataType::Varchar { max_length: 10 }),
            nullable: true,
        };
        let number = Typed {
            expr: PhysicalExpr::Column(1),
            data_type: Some(DataType::Integer),
            nullable: true,
        };
        assert!(matches!(
            check_comparable(&text, &number),
            Err(DatabaseError::TypeMismatch(_))
        ));
        assert!(check_comparable(&text, &text).is_ok());
    }
}
