use serde::{Deserialize, Serialize};

use super::logical::LogicalPlan;
use crate::types::Value;

/// Column reference resolved by the binder to a relation alias.
///
/// `relation` is `None` only for columns produced by a projection or
/// aggregate, which are matched by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub relation: Option<String>,
    pub column: String,
}

impl ColumnRef {
    #[must_use]
    pub fn new(relation: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            relation: Some(relation.into()),
            column: column.into(),
        }
    }

    #[must_use]
    pub fn bare(column: impl Into<String>) -> Self {
        Self {
            relation: None,
            column: column.into(),
        }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.relation {
            Some(rel) => write!(f, "{rel}.{}", self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Like,
}

impl BinaryOp {
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    #[must_use]
    pub const fn is_arithmetic(self) -> bool {
        matches!(self, Self::Plus | Self::Minus | Self::Multiply | Self::Divide)
    }

    /// Operator with its operands swapped (`a < b` is `b > a`)
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// `[NOT] EXISTS (subquery)`
    Exists {
        subquery: Box<LogicalPlan>,
        negated: bool,
    },
    /// `expr [NOT] IN (subquery)`; the subquery yields one column
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<LogicalPlan>,
        negated: bool,
    },
    /// Subquery yielding at most one row of one column
    ScalarSubquery(Box<LogicalPlan>),
    /// First non-NULL argument
    Coalesce(Vec<Expr>),
}

impl Expr {
    #[must_use]
    pub fn col(relation: &str, column: &str) -> Self {
        Self::Column(ColumnRef::new(relation, column))
    }

    #[must_use]
    pub const fn lit(value: Value) -> Self {
        Self::Literal(value)
    }

    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn eq(left: Self, right: Self) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::binary(BinaryOp::And, self, other)
    }

    #[must_use]
    pub fn is_null(self) -> Self {
        Self::IsNull(Box::new(self))
    }

    #[must_use]
    pub fn exists(subquery: LogicalPlan, negated: bool) -> Self {
        Self::Exists {
            subquery: Box::new(subquery),
            negated,
        }
    }

    #[must_use]
    pub fn in_subquery(expr: Self, subquery: LogicalPlan, negated: bool) -> Self {
        Self::InSubquery {
            expr: Box::new(expr),
            subquery: Box::new(subquery),
            negated,
        }
    }

    #[must_use]
    pub const fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Self::Column(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains_subquery(&self) -> bool {
        match self {
            Self::Exists { .. } | Self::InSubquery { .. } | Self::ScalarSubquery(_) => true,
            Self::Column(_) | Self::Literal(_) => false,
            Self::Binary { left, right, .. } => left.contains_subquery() || right.contains_subquery(),
            Self::Not(e) | Self::IsNull(e) | Self::IsNotNull(e) => e.contains_subquery(),
            Self::InList { expr, list, .. } => {
                expr.contains_subquery() || list.iter().any(Self::contains_subquery)
            }
            Self::Coalesce(args) => args.iter().any(Self::contains_subquery),
        }
    }

    /// Tables read by subqueries nested in this expression
    pub fn collect_tables<'a>(&'a self, out: &mut Vec<&'a crate::types::ObjectName>) {
        match self {
            Self::Column(_) | Self::Literal(_) => {}
            Self::Exists { subquery, .. } | Self::ScalarSubquery(subquery) => subquery.collect_tables(out),
            Self::InSubquery { expr, subquery, .. } => {
                expr.collect_tables(out);
                subquery.collect_tables(out);
            }
            Self::Binary { left, right, .. } => {
                left.collect_tables(out);
                right.collect_tables(out);
            }
            Self::Not(e) | Self::IsNull(e) | Self::IsNotNull(e) => e.collect_tables(out),
            Self::InList { expr, list, .. } => {
                expr.collect_tables(out);
                for item in list {
                    item.collect_tables(out);
                }
            }
            Self::Coalesce(args) => {
                for arg in args {
                    arg.collect_tables(out);
                }
            }
        }
    }

    /// Column references outside any nested subquery
    pub fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Self::Column(c) => out.push(c),
            Self::Literal(_) | Self::Exists { .. } | Self::ScalarSubquery(_) => {}
            Self::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Self::Not(e) | Self::IsNull(e) | Self::IsNotNull(e) => e.collect_columns(out),
            Self::InList { expr, list, .. } => {
                expr.collect_columns(out);
                for item in list {
                    item.collect_columns(out);
                }
            }
            Self::InSubquery { expr, .. } => expr.collect_columns(out),
            Self::Coalesce(args) => {
                for arg in args {
                    arg.collect_columns(out);
                }
            }
        }
    }
}

/// Split `a AND b AND c` into its conjuncts
#[must_use]
pub fn split_conjunction(expr: Expr) -> Vec<Expr> {
    let mut out = Vec::new();
    let mut stack = vec![expr];
    while let Some(expr) = stack.pop() {
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                stack.push(*right);
                stack.push(*left);
            }
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`split_conjunction`]
#[must_use]
pub fn conjoin(exprs: Vec<Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(Expr::and)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_conjunction_keeps_order() {
        let a = Expr::eq(Expr::col("t", "a"), Expr::lit(Value::Integer(1)));
        let b = Expr::eq(Expr::col("t", "b"), Expr::lit(Value::Integer(2)));
        let c = Expr::col("t", "c").is_null();
        let parts = split_conjunction(a.clone().and(b.clone()).and(c.clone()));
        assert_eq!(parts, vec![a, b, c]);
    }

    #[test]
    fn test_conjoin_round_trip() {
        let a = Expr::col("t", "a").is_null();
        let b = Expr::col("t", "b").is_null();
        let joined = conjoin(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(split_conjunction(joined), vec![a, b]);
        assert!(conjoin(vec![]).is_none());
    }
}
