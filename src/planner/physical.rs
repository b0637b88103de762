/// Physical plan arena
///
/// Nodes live in one `Vec` and reference their children by [`NodeId`].
/// Subqueries that could not be turned into joins get their own root inside
/// the same arena and are referenced from expressions by slot.
use serde::{Deserialize, Serialize};

use crate::ast::{AggregateFunction, BinaryOp};
use crate::types::{DataType, QualifiedName, TableHandle, Value};

pub type NodeId = usize;

/// Name of the row-id column a DML target scan appends
pub const ROW_ID_COLUMN: &str = "$row_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub relation: Option<String>,
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Distinct-value estimate carried up for join selectivity
    #[serde(skip)]
    pub distinct: Option<f64>,
}

impl OutputColumn {
    #[must_use]
    pub fn new(relation: Option<&str>, name: &str, data_type: DataType, nullable: bool) -> Self {
        Self {
            relation: relation.map(str::to_string),
            name: name.to_string(),
            data_type,
            nullable,
            distinct: None,
        }
    }
}

/// Expression with every column reference resolved to a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalExpr {
    Column(usize),
    /// Column of an enclosing row; depth 0 is the row the subquery runs for
    OuterColumn { depth: usize, index: usize },
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<PhysicalExpr>,
        right: Box<PhysicalExpr>,
    },
    Not(Box<PhysicalExpr>),
    IsNull(Box<PhysicalExpr>),
    IsNotNull(Box<PhysicalExpr>),
    InList {
        expr: Box<PhysicalExpr>,
        list: Vec<PhysicalExpr>,
        negated: bool,
    },
    Coalesce(Vec<PhysicalExpr>),
    Exists { slot: usize, negated: bool },
    /// Null-aware `[NOT] IN (subquery)`
    InSubquery {
        expr: Box<PhysicalExpr>,
        slot: usize,
        negated: bool,
    },
    ScalarSubquery { slot: usize },
}

impl PhysicalExpr {
    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Conjunction of `exprs`, `None` when empty
    #[must_use]
    pub fn conjoin(exprs: Vec<Self>) -> Option<Self> {
        exprs
            .into_iter()
            .reduce(|acc, e| Self::binary(BinaryOp::And, acc, e))
    }

    /// Lowest and highest column index referenced, ignoring outer columns
    #[must_use]
    pub fn column_span(&self) -> Option<(usize, usize)> {
        let mut span: Option<(usize, usize)> = None;
        self.visit_columns(&mut |i| {
            span = Some(span.map_or((i, i), |(lo, hi)| (lo.min(i), hi.max(i))));
        });
        span
    }

    /// Shift every column index down by `offset`
    #[must_use]
    pub fn rebased(&self, offset: usize) -> Self {
        self.map_columns(&|i| i - offset)
    }

    pub fn visit_columns(&self, f: &mut impl FnMut(usize)) {
        match self {
            Self::Column(i) => f(*i),
            Self::OuterColumn { .. }
            | Self::Literal(_)
            | Self::Exists { .. }
            | Self::ScalarSubquery { .. } => {}
            Self::Binary { left, right, .. } => {
                left.visit_columns(f);
                right.visit_columns(f);
            }
            Self::Not(e) | Self::IsNull(e) | Self::IsNotNull(e) => e.visit_columns(f),
            Self::InList { expr, list, .. } => {
                expr.visit_columns(f);
                for item in list {
                    item.visit_columns(f);
                }
            }
            Self::Coalesce(args) => {
                for arg in args {
                    arg.visit_columns(f);
                }
            }
            Self::InSubquery { expr, .. } => expr.visit_columns(f),
        }
    }

    #[must_use]
    pub fn map_columns(&self, f: &impl Fn(usize) -> usize) -> Self {
        match self {
            Self::Column(i) => Self::Column(f(*i)),
            Self::OuterColumn { .. }
            | Self::Literal(_)
            | Self::Exists { .. }
            | Self::ScalarSubquery { .. } => self.clone(),
            Self::Binary { op, left, right } => Self::binary(*op, left.map_columns(f), right.map_columns(f)),
            Self::Not(e) => Self::Not(Box::new(e.map_columns(f))),
            Self::IsNull(e) => Self::IsNull(Box::new(e.map_columns(f))),
            Self::IsNotNull(e) => Self::IsNotNull(Box::new(e.map_columns(f))),
            Self::InList { expr, list, negated } => Self::InList {
                expr: Box::new(expr.map_columns(f)),
                list: list.iter().map(|e| e.map_columns(f)).collect(),
                negated: *negated,
            },
            Self::Coalesce(args) => Self::Coalesce(args.iter().map(|e| e.map_columns(f)).collect()),
            Self::InSubquery { expr, slot, negated } => Self::InSubquery {
                expr: Box::new(expr.map_columns(f)),
                slot: *slot,
                negated: *negated,
            },
        }
    }

    /// Whether evaluation runs a subquery plan
    #[must_use]
    pub fn has_subquery(&self) -> bool {
        match self {
            Self::Exists { .. } | Self::InSubquery { .. } | Self::ScalarSubquery { .. } => true,
            Self::Column(_) | Self::OuterColumn { .. } | Self::Literal(_) => false,
            Self::Binary { left, right, .. } => left.has_subquery() || right.has_subquery(),
            Self::Not(e) | Self::IsNull(e) | Self::IsNotNull(e) => e.has_subquery(),
            Self::InList { expr, list, .. } => expr.has_subquery() || list.iter().any(Self::has_subquery),
            Self::Coalesce(args) => args.iter().any(Self::has_subquery),
        }
    }

    /// Every outer reference, as `(depth, index)`
    pub fn visit_outer(&self, f: &mut impl FnMut(usize, usize)) {
        match self {
            Self::OuterColumn { depth, index } => f(*depth, *index),
            Self::Column(_) | Self::Literal(_) | Self::Exists { .. } | Self::ScalarSubquery { .. } => {}
            Self::Binary { left, right, .. } => {
                left.visit_outer(f);
                right.visit_outer(f);
            }
            Self::Not(e) | Self::IsNull(e) | Self::IsNotNull(e) => e.visit_outer(f),
            Self::InList { expr, list, .. } => {
                expr.visit_outer(f);
                for item in list {
                    item.visit_outer(f);
                }
            }
            Self::Coalesce(args) => {
                for arg in args {
                    arg.visit_outer(f);
                }
            }
            Self::InSubquery { expr, .. } => expr.visit_outer(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinAlgorithm {
    HashJoin,
    NestedLoopJoin,
    IndexNestedLoopJoin,
    SortMergeJoin,
}

impl std::fmt::Display for JoinAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::HashJoin => "HashJoin",
            Self::NestedLoopJoin => "NestedLoopJoin",
            Self::IndexNestedLoopJoin => "IndexNestedLoopJoin",
            Self::SortMergeJoin => "SortMergeJoin",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalJoinKind {
    Inner,
    Left,
    Semi,
    Anti,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalAggregate {
    pub func: AggregateFunction,
    pub arg: Option<PhysicalExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    SeqScan {
        table: QualifiedName,
        handle: TableHandle,
        filter: Option<PhysicalExpr>,
        with_row_id: bool,
    },
    Values {
        rows: Vec<Vec<Value>>,
    },
    Filter {
        predicate: PhysicalExpr,
    },
    Project {
        exprs: Vec<PhysicalExpr>,
    },
    /// Children: `[left, right]`; output is left columns then right columns,
    /// except semi/anti joins, which emit left columns only unless
    /// `emit_right_nulls` pads them with NULLs.
    Join {
        algorithm: JoinAlgorithm,
        kind: PhysicalJoinKind,
        /// Equality keys: first evaluated on the left row, second on the right
        keys: Vec<(PhysicalExpr, PhysicalExpr)>,
        /// Evaluated over the concatenated `left ++ right` row
        residual: Option<PhysicalExpr>,
        emit_right_nulls: bool,
    },
    /// Output groups are sorted by their keys
    Aggregate {
        group_by: Vec<PhysicalExpr>,
        aggregates: Vec<PhysicalAggregate>,
    },
    /// Computed once per execution and replayed to every consumer
    Materialize,
}

impl Operator {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SeqScan { .. } => "SeqScan",
            Self::Values { .. } => "Values",
            Self::Filter { .. } => "Filter",
            Self::Project { .. } => "Project",
            Self::Join { kind, .. } => match kind {
                PhysicalJoinKind::Inner => "InnerJoin",
                PhysicalJoinKind::Left => "LeftJoin",
                PhysicalJoinKind::Semi => "SemiJoin",
                PhysicalJoinKind::Anti => "AntiJoin",
            },
            Self::Aggregate { .. } => "Aggregate",
            Self::Materialize => "Materialize",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalNode {
    pub operator: Operator,
    pub schema: Vec<OutputColumn>,
    pub estimated_rows: f64,
    pub children: Vec<NodeId>,
    /// Output columns the rows are sorted on (by value key), if any
    #[serde(default)]
    pub ordering: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubqueryKind {
    Exists,
    In,
    Scalar,
}

/// Subquery evaluated through expressions rather than joined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubqueryPlan {
    pub root: NodeId,
    pub kind: SubqueryKind,
    /// Outer columns the result depends on, as `(depth, index)` seen from
    /// the row the subquery is evaluated for; results are memoized on them
    pub correlation: Vec<(usize, usize)>,
}

/// Read-only EXPLAIN view of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainNode {
    pub operator: String,
    pub algorithm: Option<JoinAlgorithm>,
    pub estimated_rows: u64,
    pub children: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Pre-order walk over this node and its descendants
    pub fn walk(&self) -> Vec<&Self> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    nodes: Vec<PhysicalNode>,
    root: NodeId,
    subqueries: Vec<SubqueryPlan>,
}

impl PhysicalPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: PhysicalNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn add_subquery(&mut self, subquery: SubqueryPlan) -> usize {
        self.subqueries.push(subquery);
        self.subqueries.len() - 1
    }

    pub const fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    #[must_use]
    pub fn nodes(&self) -> &[PhysicalNode] {
        &self.nodes
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &PhysicalNode {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut PhysicalNode {
        &mut self.nodes[id]
    }

    /// Arena sizes, for undoing a lowering attempt with [`Self::truncate`]
    pub(crate) fn mark(&self) -> (usize, usize) {
        (self.nodes.len(), self.subqueries.len())
    }

    pub(crate) fn truncate(&mut self, mark: (usize, usize)) {
        self.nodes.truncate(mark.0);
        self.subqueries.truncate(mark.1);
    }

    #[must_use]
    pub fn subqueries(&self) -> &[SubqueryPlan] {
        &self.subqueries
    }

    #[must_use]
    pub fn subquery(&self, slot: usize) -> &SubqueryPlan {
        &self.subqueries[slot]
    }

    /// Output schema of the root
    #[must_use]
    pub fn schema(&self) -> &[OutputColumn] {
        &self.nodes[self.root].schema
    }

    #[must_use]
    pub fn explain_tree(&self) -> ExplainNode {
        self.explain_node(self.root)
    }

    fn explain_node(&self, id: NodeId) -> ExplainNode {
        let node = &self.nodes[id];
        let algorithm = match &node.operator {
            Operator::Join { algorithm, .. } => Some(*algorithm),
            _ => None,
        };
        ExplainNode {
            operator: node.operator.name().to_string(),
            algorithm,
            estimated_rows: node.estimated_rows.max(0.0).round() as u64,
            children: node.children.iter().map(|c| self.explain_node(*c)).collect(),
        }
    }

    /// Ids of every node reachable from the root, subquery roots included
    #[must_use]
    pub fn reachable(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        stack.extend(self.subqueries.iter().map(|s| s.root));
        while let Some(id) = stack.pop() {
            if !out.contains(&id) {
                out.push(id);
                stack.extend(self.nodes[id].children.iter().copied());
            }
        }
        out
    }
}
