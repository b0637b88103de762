/// Expression evaluation over rows
///
/// SQL three-valued logic: comparisons with NULL are unknown (`Value::Null`),
/// AND/OR follow the Kleene tables, and only `TRUE` passes a filter.
/// Supports: comparisons, arithmetic, LIKE, IN lists, IS [NOT] NULL,
/// COALESCE and subqueries (through the running [`QueryExecutor`]).
use std::cmp::Ordering;

use rust_decimal::Decimal;

use super::queries::QueryExecutor;
use crate::ast::BinaryOp;
use crate::planner::physical::PhysicalExpr;
use crate::types::{DatabaseError, Value};

pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Whether `predicate` is TRUE for `row`
    pub fn matches(
        predicate: &PhysicalExpr,
        row: &[Value],
        executor: &mut QueryExecutor<'_>,
    ) -> Result<bool, DatabaseError> {
        Ok(matches!(Self::evaluate(predicate, row, executor)?, Value::Boolean(true)))
    }

    pub fn evaluate(
        expr: &PhysicalExpr,
        row: &[Value],
        executor: &mut QueryExecutor<'_>,
    ) -> Result<Value, DatabaseError> {
        match expr {
            PhysicalExpr::Column(i) => row
                .get(*i)
                .cloned()
                .ok_or_else(|| DatabaseError::Storage(format!("row has no column {i}"))),
            PhysicalExpr::OuterColumn { depth, index } => executor.outer_value(*depth, *index),
            PhysicalExpr::Literal(value) => Ok(value.clone()),
            PhysicalExpr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let left = Self::evaluate(left, row, executor)?;
                if matches!(left, Value::Boolean(false)) {
                    return Ok(left);
                }
                let right = Self::evaluate(right, row, executor)?;
                Ok(match (left, right) {
                    (_, Value::Boolean(false)) => Value::Boolean(false),
                    (Value::Boolean(true), Value::Boolean(true)) => Value::Boolean(true),
                    _ => Value::Null,
                })
            }
            PhysicalExpr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let left = Self::evaluate(left, row, executor)?;
                if matches!(left, Value::Boolean(true)) {
                    return Ok(left);
                }
                let right = Self::evaluate(right, row, executor)?;
                Ok(match (left, right) {
                    (_, Value::Boolean(true)) => Value::Boolean(true),
                    (Value::Boolean(false), Value::Boolean(false)) => Value::Boolean(false),
                    _ => Value::Null,
                })
            }
            PhysicalExpr::Binary { op, left, right } => {
                let left = Self::evaluate(left, row, executor)?;
                let right = Self::evaluate(right, row, executor)?;
                Self::apply_binary(*op, &left, &right)
            }
            PhysicalExpr::Not(inner) => Ok(match Self::evaluate(inner, row, executor)? {
                Value::Boolean(b) => Value::Boolean(!b),
                _ => Value::Null,
            }),
            PhysicalExpr::IsNull(inner) => Ok(Value::Boolean(Self::evaluate(inner, row, executor)?.is_null())),
            PhysicalExpr::IsNotNull(inner) => {
                Ok(Value::Boolean(!Self::evaluate(inner, row, executor)?.is_null()))
            }
            PhysicalExpr::InList { expr, list, negated } => {
                let probe = Self::evaluate(expr, row, executor)?;
                let mut candidates = Vec::with_capacity(list.len());
                for item in list {
                    candidates.push(Self::evaluate(item, row, executor)?);
                }
                Ok(negate(Self::in_values(&probe, candidates.iter())?, *negated))
            }
            PhysicalExpr::Coalesce(args) => {
                for arg in args {
                    let value = Self::evaluate(arg, row, executor)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            PhysicalExpr::Exists { slot, negated } => {
                let rows = executor.subquery_rows(*slot, row)?;
                Ok(Value::Boolean(rows.is_empty() == *negated))
            }
            PhysicalExpr::InSubquery { expr, slot, negated } => {
                let probe = Self::evaluate(expr, row, executor)?;
                let rows = executor.subquery_rows(*slot, row)?;
                let found = Self::in_values(&probe, rows.iter().filter_map(|r| r.first()))?;
                Ok(negate(found, *negated))
            }
            PhysicalExpr::ScalarSubquery { slot } => {
                let rows = executor.subquery_rows(*slot, row)?;
                match rows.as_slice() {
                    [] => Ok(Value::Null),
                    [only] => Ok(only.first().cloned().unwrap_or(Value::Null)),
                    _ => Err(DatabaseError::ConstraintViolation(format!(
                        "scalar subquery returned {} rows",
                        rows.len()
                    ))),
                }
            }
        }
    }

    /// `probe IN (candidates)`: TRUE on a match, NULL if nothing matched but
    /// a NULL was involved, FALSE otherwise
    fn in_values<'v>(probe: &Value, candidates: impl Iterator<Item = &'v Value>) -> Result<Value, DatabaseError> {
        if probe.is_null() {
            // Empty candidate lists are FALSE even for NULL
            let mut candidates = candidates.peekable();
            return Ok(if candidates.peek().is_some() { Value::Null } else { Value::Boolean(false) });
        }
        let mut saw_null = false;
        for candidate in candidates {
            match probe.sql_cmp(candidate)? {
                Some(Ordering::Equal) => return Ok(Value::Boolean(true)),
                None => saw_null = true,
                Some(_) => {}
            }
        }
        Ok(if saw_null { Value::Null } else { Value::Boolean(false) })
    }

    pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, DatabaseError> {
        match op {
            BinaryOp::Like => Self::match_like(left, right),
            op if op.is_comparison() => {
                let Some(ordering) = left.sql_cmp(right)? else {
                    return Ok(Value::Null);
                };
                Ok(Value::Boolean(match op {
                    BinaryOp::Eq => ordering == Ordering::Equal,
                    BinaryOp::NotEq => ordering != Ordering::Equal,
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::LtEq => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            op if op.is_arithmetic() => Self::arithmetic(op, left, right),
            other => Err(DatabaseError::TypeMismatch(format!(
                "{other:?} applied to {left} and {right}"
            ))),
        }
    }

    fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, DatabaseError> {
        if left.is_null() || right.is_null() {
            return Ok(Value::Null);
        }
        if !(left.is_numeric() && right.is_numeric()) {
            return Err(DatabaseError::TypeMismatch(format!(
                "cannot apply {op:?} to {left} and {right}"
            )));
        }
        let overflow = || DatabaseError::TypeMismatch(format!("numeric overflow in {left} {op:?} {right}"));

        match (left, right) {
            (Value::SmallInt(_) | Value::Integer(_), Value::SmallInt(_) | Value::Integer(_)) => {
                let (a, b) = (left.as_int().unwrap_or_default(), right.as_int().unwrap_or_default());
                if op == BinaryOp::Divide && b == 0 {
                    return Err(division_by_zero());
                }
                let result = match op {
                    BinaryOp::Plus => a.checked_add(b),
                    BinaryOp::Minus => a.checked_sub(b),
                    BinaryOp::Multiply => a.checked_mul(b),
                    _ => a.checked_div(b),
                }
                .ok_or_else(overflow)?;
                if matches!((left, right), (Value::SmallInt(_), Value::SmallInt(_))) {
                    i16::try_from(result).map(Value::SmallInt).map_err(|_| overflow())
                } else {
                    Ok(Value::Integer(result))
                }
            }
            (Value::Real(_), _) | (_, Value::Real(_)) => {
                let (a, b) = (left.to_f64().unwrap_or(f64::NAN), right.to_f64().unwrap_or(f64::NAN));
                if op == BinaryOp::Divide && b == 0.0 {
                    return Err(division_by_zero());
                }
                let result = match op {
                    BinaryOp::Plus => a + b,
                    BinaryOp::Minus => a - b,
                    BinaryOp::Multiply => a * b,
                    _ => a / b,
                };
                if result.is_finite() {
                    Ok(Value::Real(result))
                } else {
                    Err(overflow())
                }
            }
            _ => {
                let a: Decimal = left.to_decimal().ok_or_else(overflow)?;
                let b: Decimal = right.to_decimal().ok_or_else(overflow)?;
                if op == BinaryOp::Divide && b.is_zero() {
                    return Err(division_by_zero());
                }
                let result = match op {
                    BinaryOp::Plus => a.checked_add(b),
                    BinaryOp::Minus => a.checked_sub(b),
                    BinaryOp::Multiply => a.checked_mul(b),
                    _ => a.checked_div(b),
                };
                result.map(Value::Numeric).ok_or_else(overflow)
            }
        }
    }

    /// Match LIKE pattern
    /// Supports: % (any chars), _ (single char)
    fn match_like(value: &Value, pattern: &Value) -> Result<Value, DatabaseError> {
        match (value, pattern) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Text(text), Value::Text(pattern)) => Ok(Value::Boolean(Self::like_pattern_match(text, pattern))),
            _ => Err(DatabaseError::TypeMismatch(format!("LIKE applied to {value} and {pattern}"))),
        }
    }

    /// % matches zero or more characters, _ exactly one
    fn like_pattern_match(text: &str, pattern: &str) -> bool {
        let text_chars: Vec<char> = text.chars().collect();
        let pattern_chars: Vec<char> = pattern.chars().collect();
        Self::match_recursive(&text_chars, &pattern_chars, 0, 0)
    }

    fn match_recursive(text: &[char], pattern: &[char], ti: usize, pi: usize) -> bool {
        if pi >= pattern.len() {
            return ti >= text.len();
        }

        if pattern[pi] == '%' {
            // Collapse runs of %
            let next = pattern[pi..].iter().position(|c| *c != '%').map_or(pattern.len(), |p| pi + p);
            return (ti..=text.len()).any(|start| Self::match_recursive(text, pattern, start, next));
        }

        if ti >= text.len() {
            return false;
        }

        if pattern[pi] == '_' || text[ti] == pattern[pi] {
            return Self::match_recursive(text, pattern, ti + 1, pi + 1);
        }

        false
    }
}

fn negate(value: Value, negated: bool) -> Value {
    match value {
        Value::Boolean(b) if negated => Value::Boolean(!b),
        other => other,
    }
}

fn division_by_zero() -> DatabaseError {
    DatabaseError::TypeMismatch("division by zero".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn test_like_operator() {
        assert!(ConditionEvaluator::like_pattern_match("Alice", "A%"));
        assert!(ConditionEvaluator::like_pattern_match("Alice", "%ice"));
        assert!(ConditionEvaluator::like_pattern_match("Alice", "_lice"));
        assert!(ConditionEvaluator::like_pattern_match("Alice", "%%l%"));
        assert!(!ConditionEvaluator::like_pattern_match("Alice", "B%"));
        assert!(!ConditionEvaluator::like_pattern_match("Alice", "Alic"));
        assert!(ConditionEvaluator::like_pattern_match("", "%"));
    }

    #[test]
    fn test_comparison_with_null_is_unknown() {
        let result = ConditionEvaluator::apply_binary(BinaryOp::Eq, &Value::Null, &Value::Integer(1)).unwrap();
        assert_eq!(result, Value::Null);
        let result = ConditionEvaluator::apply_binary(BinaryOp::LtEq, &Value::Integer(1), &Value::Real(1.0)).unwrap();
        assert_eq!(result, Value::Boolean(true));
    }

    #[test]
    fn test_like_with_null() {
        assert_eq!(
            ConditionEvaluator::apply_binary(BinaryOp::Like, &Value::Null, &text("%")).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(
            ConditionEvaluator::apply_binary(BinaryOp::Plus, &Value::Integer(2), &Value::SmallInt(3)).unwrap(),
            Value::Integer(5)
        );
        assert_eq!(
            ConditionEvaluator::apply_binary(BinaryOp::Divide, &Value::Integer(7), &Value::Integer(2)).unwrap(),
            Value::Integer(3)
        );
        assert!(ConditionEvaluator::apply_binary(BinaryOp::Divide, &Value::Integer(1), &Value::Integer(0)).is_err());
        assert!(ConditionEvaluator::apply_binary(BinaryOp::Multiply, &Value::Integer(i64::MAX), &Value::Integer(2)).is_err());
        assert!(
            ConditionEvaluator::apply_binary(BinaryOp::Plus, &Value::SmallInt(i16::MAX), &Value::SmallInt(1)).is_err()
        );
    }

    #[test]
    fn test_decimal_arithmetic_keeps_exactness() {
        let a = Value::Numeric(Decimal::new(110, 2));
        let b = Value::Numeric(Decimal::new(220, 2));
        assert_eq!(
            ConditionEvaluator::apply_binary(BinaryOp::Plus, &a, &b).unwrap(),
            Value::Numeric(Decimal::new(330, 2))
        );
    }

    #[test]
    fn test_in_values_three_valued() {
        let list = [Value::Integer(1), Value::Null];
        assert_eq!(
            ConditionEvaluator::in_values(&Value::Integer(1), list.iter()).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(ConditionEvaluator::in_values(&Value::Integer(2), list.iter()).unwrap(), Value::Null);
        assert_eq!(
            ConditionEvaluator::in_values(&Value::Null, std::iter::empty()).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(negate(Value::Null, true), Value::Null);
    }
}
