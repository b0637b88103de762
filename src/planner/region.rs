//! Inner-join regions: a maximal tree of Filter / inner / cross joins is
//! flattened into relations plus predicates and rebuilt in cost order.
use tracing::debug;

use super::join_order::{JoinGraph, JoinTree, MAX_RELATIONS};
use super::physical::{NodeId, Operator, OutputColumn, PhysicalExpr, PhysicalJoinKind, PhysicalNode};
use super::statistics::DEFAULT_SELECTIVITY;
use super::{LogicalColumns, Planner, expect_boolean, find_named};
use crate::ast::{BinaryOp, Expr, JoinKind, LogicalPlan, split_conjunction};
use crate::types::DatabaseError;

/// Leaf ranges `start..split` and `split..end` of one CROSS JOIN
type CrossRange = (usize, usize, usize);

fn flatten<'p>(
    logical: &'p LogicalPlan,
    leaves: &mut Vec<&'p LogicalPlan>,
    conjuncts: &mut Vec<Expr>,
    crosses: &mut Vec<CrossRange>,
) {
    match logical {
        LogicalPlan::Filter { input, predicate } => {
            flatten(input, leaves, conjuncts, crosses);
            conjuncts.extend(split_conjunction(predicate.clone()));
        }
        LogicalPlan::Join {
            left,
            right,
            kind: kind @ (JoinKind::Inner | JoinKind::Cross),
            on,
        } => {
            let start = leaves.len();
            flatten(left, leaves, conjuncts, crosses);
            let split = leaves.len();
            flatten(right, leaves, conjuncts, crosses);
            if *kind == JoinKind::Cross {
                crosses.push((start, split, leaves.len()));
            }
            if let Some(on) = on {
                conjuncts.extend(split_conjunction(on.clone()));
            }
        }
        other => leaves.push(other),
    }
}

/// Where a region predicate is evaluated
enum Placement {
    Leaf(usize),
    Edge(usize, usize),
    /// Three or more relations: at the first join covering all of them
    Hyper(u64),
    /// Above the whole region
    Top,
}

/// Region predicates already resolved over the concatenated leaf schemas
struct RegionPredicates {
    edges: Vec<PhysicalExpr>,
    hyper: Vec<(u64, PhysicalExpr)>,
}

struct Built {
    id: NodeId,
    /// Region-level column index of each output column
    layout: Vec<usize>,
    mask: u64,
}

impl Planner<'_> {
    pub(super) fn lower_region(&mut self, logical: &LogicalPlan, pending: Vec<Expr>) -> Result<NodeId, DatabaseError> {
        let mut leaves = Vec::new();
        let mut conjuncts = Vec::new();
        let mut crosses = Vec::new();
        flatten(logical, &mut leaves, &mut conjuncts, &mut crosses);
        conjuncts.extend(pending);

        if leaves.len() == 1 {
            return self.lower(leaves[0], conjuncts);
        }
        if leaves.len() > MAX_RELATIONS {
            return Err(DatabaseError::UnsupportedPlanShape(format!(
                "join of {} relations exceeds the limit of {MAX_RELATIONS}",
                leaves.len()
            )));
        }

        let columns = leaves
            .iter()
            .map(|l| self.logical_columns(l))
            .collect::<Result<Vec<_>, _>>()?;
        let mut leaf_pending = vec![Vec::new(); leaves.len()];
        let mut edge_conjuncts = Vec::new();
        let mut hyper_conjuncts = Vec::new();
        let mut top = Vec::new();
        for conjunct in conjuncts {
            match placement(&conjunct, &columns) {
                Placement::Leaf(i) => leaf_pending[i].push(conjunct),
                Placement::Edge(a, b) => edge_conjuncts.push((a, b, conjunct)),
                Placement::Hyper(mask) => hyper_conjuncts.push((mask, conjunct)),
                Placement::Top => top.push(conjunct),
            }
        }

        let mut ids = Vec::with_capacity(leaves.len());
        for (leaf, pending) in leaves.iter().zip(leaf_pending) {
            ids.push(self.lower(leaf, pending)?);
        }
        let mut offsets = Vec::with_capacity(ids.len());
        let mut region_schema: Vec<OutputColumn> = Vec::new();
        for id in &ids {
            offsets.push(region_schema.len());
            region_schema.extend(self.plan.node(*id).schema.iter().cloned());
        }
        let rows: Vec<f64> = ids.iter().map(|id| self.plan.node(*id).estimated_rows).collect();

        let mut graph = JoinGraph::new(rows.clone())?;
        for &(start, split, end) in &crosses {
            for a in start..split {
                for b in split..end {
                    graph.add_cross(a, b);
                }
            }
        }
        let mut predicates = RegionPredicates {
            edges: Vec::with_capacity(edge_conjuncts.len()),
            hyper: Vec::with_capacity(hyper_conjuncts.len()),
        };
        for (a, b, conjunct) in &edge_conjuncts {
            let typed = self.resolve(conjunct, &region_schema, 0)?;
            expect_boolean(&typed, "join predicate")?;
            let (selectivity, equi) = edge_selectivity(&typed.expr, &region_schema, &offsets, &rows, *a, *b);
            graph.add_predicate(*a, *b, predicates.edges.len(), selectivity, equi);
            predicates.edges.push(typed.expr);
        }
        for (mask, conjunct) in &hyper_conjuncts {
            let typed = self.resolve(conjunct, &region_schema, 0)?;
            expect_boolean(&typed, "join predicate")?;
            graph.add_hyperedge(*mask, DEFAULT_SELECTIVITY);
            predicates.hyper.push((*mask, typed.expr));
        }

        let order = graph.best_order(self.config)?;
        debug!(
            relations = ids.len(),
            edges = graph.edge_count(),
            cost = order.cost,
            rows = order.rows,
            "ordered join region"
        );

        let built = self.build_tree(&order.tree, &ids, &offsets, &graph, &predicates)?;
        let root = self.restore_layout(built, region_schema.len());
        self.apply_pending(root, top)
    }

    fn build_tree(
        &mut self,
        tree: &JoinTree,
        ids: &[NodeId],
        offsets: &[usize],
        graph: &JoinGraph,
        predicates: &RegionPredicates,
    ) -> Result<Built, DatabaseError> {
        let (left, right) = match tree {
            JoinTree::Leaf(i) => {
                let width = self.plan.node(ids[*i]).schema.len();
                return Ok(Built {
                    id: ids[*i],
                    layout: (offsets[*i]..offsets[*i] + width).collect(),
                    mask: 1 << i,
                });
            }
            JoinTree::Join(left, right) => (
                self.build_tree(left, ids, offsets, graph, predicates)?,
                self.build_tree(right, ids, offsets, graph, predicates)?,
            ),
        };
        let mask = left.mask | right.mask;

        let mut selected: Vec<&PhysicalExpr> = Vec::new();
        for a in bits(left.mask) {
            for b in bits(right.mask) {
                if let Some(edge) = graph.edge(a, b) {
                    selected.extend(edge.predicates.iter().map(|p| &predicates.edges[*p]));
                }
            }
        }
        selected.extend(
            predicates
                .hyper
                .iter()
                .filter(|(m, _)| m & mask == *m && m & left.mask != *m && m & right.mask != *m)
                .map(|(_, p)| p),
        );

        // Region column index -> position in `left ++ right`
        let width = left.layout.iter().chain(&right.layout).max().map_or(0, |m| m + 1);
        let mut position = vec![0; width];
        for (p, region) in left.layout.iter().chain(&right.layout).enumerate() {
            position[*region] = p;
        }
        let conditions = selected
            .into_iter()
            .map(|p| p.map_columns(&|i| position[i]))
            .collect();

        let (id, swapped) = self.build_join(
            left.id,
            right.id,
            PhysicalJoinKind::Inner,
            conditions,
            false,
            Some(graph.cardinality(mask)),
        )?;
        let layout = if swapped {
            right.layout.into_iter().chain(left.layout).collect()
        } else {
            left.layout.into_iter().chain(right.layout).collect()
        };
        Ok(Built { id, layout, mask })
    }

    /// Put the columns back in the order the leaves were written in
    fn restore_layout(&mut self, built: Built, width: usize) -> NodeId {
        if built.layout.iter().copied().eq(0..width) {
            return built.id;
        }
        let mut position = vec![0; width];
        for (p, region) in built.layout.iter().enumerate() {
            position[*region] = p;
        }
        let child = self.plan.node(built.id);
        let schema = position.iter().map(|p| child.schema[*p].clone()).collect();
        let exprs = position.iter().map(|p| PhysicalExpr::Column(*p)).collect();
        let node = PhysicalNode {
            operator: Operator::Project { exprs },
            schema,
            estimated_rows: child.estimated_rows,
            children: vec![built.id],
            ordering: Vec::new(),
        };
        self.plan.push(node)
    }
}

fn bits(mask: u64) -> impl Iterator<Item = usize> {
    (0..64).filter(move |i| mask & (1 << i) != 0)
}

fn placement(conjunct: &Expr, columns: &[LogicalColumns]) -> Placement {
    let mut mask = 0u64;
    for reference in super::rewrite::visible_refs(conjunct) {
        let owners: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| find_named(c, &reference).is_some())
            .map(|(i, _)| i)
            .collect();
        match owners.as_slice() {
            [] => {}
            [only] => mask |= 1 << only,
            // Ambiguous: resolution above the region reports it
            _ => return Placement::Top,
        }
    }
    match mask.count_ones() {
        1 => Placement::Leaf(mask.trailing_zeros() as usize),
        0 => Placement::Top,
        // Subqueries are planned against the region's final row
        _ if conjunct.contains_subquery() => Placement::Top,
        2 => {
            let a = mask.trailing_zeros() as usize;
            let b = 63 - mask.leading_zeros() as usize;
            Placement::Edge(a, b)
        }
        _ => Placement::Hyper(mask),
    }
}

/// Selectivity of a two-relation predicate and whether it is an equi-join
fn edge_selectivity(
    predicate: &PhysicalExpr,
    schema: &[OutputColumn],
    offsets: &[usize],
    rows: &[f64],
    a: usize,
    b: usize,
) -> (f64, bool) {
    let leaf_of = |column: usize| offsets.iter().rposition(|o| *o <= column);
    let side = |expr: &PhysicalExpr| {
        let (lo, hi) = expr.column_span()?;
        let leaf = leaf_of(lo)?;
        (leaf_of(hi) == Some(leaf)).then_some(leaf)
    };
    let distinct = |expr: &PhysicalExpr, leaf: usize| match expr {
        PhysicalExpr::Column(i) => schema[*i].distinct.unwrap_or(rows[leaf]),
        _ => rows[leaf],
    };
    if let PhysicalExpr::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = predicate
    {
        if let (Some(l), Some(r)) = (side(left), side(right)) {
            if (l == a && r == b) || (l == b && r == a) {
                let d = distinct(left, l).max(distinct(right, r)).max(1.0);
                return (1.0 / d, true);
            }
        }
    }
    (DEFAULT_SELECTIVITY, false)
}
