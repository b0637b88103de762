use serde::{Deserialize, Serialize};

use super::expr::Expr;
use crate::types::{DataType, ObjectName, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    /// Explicit `CROSS JOIN`: the only way to ask for a cartesian product
    Cross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// `COUNT(expr)`, or `COUNT(*)` when the argument is absent
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    pub func: AggregateFunction,
    pub arg: Option<Expr>,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectItem {
    pub expr: Expr,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuesColumn {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

/// Relational operator tree produced by the binder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    Scan {
        table: ObjectName,
        alias: String,
        /// Emit the storage row id as a trailing column (DML targets)
        #[serde(default)]
        with_row_id: bool,
    },
    Values {
        alias: String,
        columns: Vec<ValuesColumn>,
        rows: Vec<Vec<Value>>,
    },
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        kind: JoinKind,
        on: Option<Expr>,
    },
    /// Left rows with at least one match, left columns only
    SemiJoin {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        on: Expr,
    },
    /// Left rows with no match, left columns only
    AntiJoin {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        on: Expr,
    },
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
    },
    Project {
        input: Box<LogicalPlan>,
        items: Vec<ProjectItem>,
    },
    /// Re-labels every output column with a new relation alias
    SubqueryAlias {
        input: Box<LogicalPlan>,
        alias: String,
    },
}

impl LogicalPlan {
    #[must_use]
    pub fn scan(table: impl Into<ObjectName>, alias: &str) -> Self {
        Self::Scan {
            table: table.into(),
            alias: alias.to_string(),
            with_row_id: false,
        }
    }

    #[must_use]
    pub fn filter(self, predicate: Expr) -> Self {
        Self::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    #[must_use]
    pub fn join(self, right: Self, kind: JoinKind, on: Option<Expr>) -> Self {
        Self::Join {
            left: Box::new(self),
            right: Box::new(right),
            kind,
            on,
        }
    }

    #[must_use]
    pub fn inner_join(self, right: Self, on: Expr) -> Self {
        self.join(right, JoinKind::Inner, Some(on))
    }

    #[must_use]
    pub fn project(self, items: Vec<(Expr, &str)>) -> Self {
        Self::Project {
            input: Box::new(self),
            items: items
                .into_iter()
                .map(|(expr, alias)| ProjectItem {
                    expr,
                    alias: alias.to_string(),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn aggregate(self, group_by: Vec<Expr>, aggregates: Vec<AggregateExpr>) -> Self {
        Self::Aggregate {
            input: Box::new(self),
            group_by,
            aggregates,
        }
    }

    #[must_use]
    pub fn alias(self, alias: &str) -> Self {
        Self::SubqueryAlias {
            input: Box::new(self),
            alias: alias.to_string(),
        }
    }

    /// Relation aliases introduced by this tree, not counting subqueries
    /// nested in expressions
    #[must_use]
    pub fn relation_aliases(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_aliases(&mut out);
        out
    }

    /// Every stored table the tree reads, including subqueries in expressions
    pub fn collect_tables<'a>(&'a self, out: &mut Vec<&'a ObjectName>) {
        match self {
            Self::Scan { table, .. } => out.push(table),
            Self::Values { .. } => {}
            Self::Filter { input, predicate } => {
                input.collect_tables(out);
                predicate.collect_tables(out);
            }
            Self::Join { left, right, on, .. } => {
                left.collect_tables(out);
                right.collect_tables(out);
                if let Some(on) = on {
                    on.collect_tables(out);
                }
            }
            Self::SemiJoin { left, right, on } | Self::AntiJoin { left, right, on } => {
                left.collect_tables(out);
                right.collect_tables(out);
                on.collect_tables(out);
            }
            Self::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                input.collect_tables(out);
                for expr in group_by.iter().chain(aggregates.iter().filter_map(|a| a.arg.as_ref())) {
                    expr.collect_tables(out);
                }
            }
            Self::Project { input, items } => {
                input.collect_tables(out);
                for item in items {
                    item.expr.collect_tables(out);
                }
            }
            Self::SubqueryAlias { input, .. } => input.collect_tables(out),
        }
    }

    fn collect_aliases(&self, out: &mut Vec<String>) {
        match self {
            Self::Scan { alias, .. } | Self::Values { alias, .. } | Self::SubqueryAlias { alias, .. } => {
                out.push(alias.clone());
                if let Self::SubqueryAlias { input, .. } = self {
                    input.collect_aliases(out);
                }
            }
            Self::Filter { input, .. } | Self::Aggregate { input, .. } | Self::Project { input, .. } => {
                input.collect_aliases(out);
            }
            Self::Join { left, right, .. } | Self::SemiJoin { left, right, .. } | Self::AntiJoin { left, right, .. } => {
                left.collect_aliases(out);
                right.collect_aliases(out);
            }
        }
    }
}
