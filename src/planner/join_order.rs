/// Join graph and join order search
///
/// Relations are numbered `0..n` in the order the query names them. Edges
/// carry the merged selectivity of every predicate between a pair. The
/// cardinality of a set of relations is the product of their sizes and of
/// the selectivities of the edges inside the set, so it does not depend on
/// the order in which the set was joined.
///
/// A CROSS JOIN shows up as predicate-free edges between the relations it
/// names, so only requested products connect the graph. Predicates over three
/// or more relations are hyperedges: they connect all of their members.
use std::collections::BTreeMap;

use tracing::debug;

use super::algorithm::{JoinInputs, choose_algorithm, input_cost};
use super::physical::PhysicalJoinKind;
use crate::config::PlannerConfig;
use crate::types::DatabaseError;

/// Largest join region the bitmask representation supports
pub const MAX_RELATIONS: usize = 64;
/// Hard ceiling on the exhaustive search, whatever the configuration says
const MAX_DP_RELATIONS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct JoinEdge {
    pub selectivity: f64,
    /// Whether at least one predicate is an equality
    pub equi: bool,
    pub predicates: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTree {
    Leaf(usize),
    Join(Box<JoinTree>, Box<JoinTree>),
}

impl JoinTree {
    #[must_use]
    pub fn mask(&self) -> u64 {
        match self {
            Self::Leaf(i) => 1 << i,
            Self::Join(l, r) => l.mask() | r.mask(),
        }
    }

    /// Relations in left-to-right leaf order
    #[must_use]
    pub fn leaves(&self) -> Vec<usize> {
        match self {
            Self::Leaf(i) => vec![*i],
            Self::Join(l, r) => {
                let mut out = l.leaves();
                out.extend(r.leaves());
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOrder {
    pub tree: JoinTree,
    pub cost: f64,
    pub rows: f64,
}

#[derive(Debug, Clone)]
pub struct JoinGraph {
    cardinalities: Vec<f64>,
    edges: BTreeMap<(usize, usize), JoinEdge>,
    /// Member mask and selectivity of each multi-relation predicate
    hyperedges: Vec<(u64, f64)>,
}

#[derive(Debug, Clone, Copy)]
struct Best {
    cost: f64,
    rows: f64,
    left: u64,
    right: u64,
}

impl JoinGraph {
    pub fn new(cardinalities: Vec<f64>) -> Result<Self, DatabaseError> {
        if cardinalities.len() > MAX_RELATIONS {
            return Err(DatabaseError::UnsupportedPlanShape(format!(
                "join of {} relations exceeds the limit of {MAX_RELATIONS}",
                cardinalities.len()
            )));
        }
        Ok(Self {
            cardinalities: cardinalities.into_iter().map(|c| c.max(1.0)).collect(),
            edges: BTreeMap::new(),
            hyperedges: Vec::new(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cardinalities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cardinalities.is_empty()
    }

    /// Add a predicate between `a` and `b`, merging with an existing edge
    pub fn add_predicate(&mut self, a: usize, b: usize, predicate: usize, selectivity: f64, equi: bool) {
        let key = (a.min(b), a.max(b));
        let edge = self.edges.entry(key).or_insert(JoinEdge {
            selectivity: 1.0,
            equi: false,
            predicates: Vec::new(),
        });
        edge.selectivity *= selectivity.clamp(0.0, 1.0);
        edge.equi |= equi;
        edge.predicates.push(predicate);
    }

    /// Explicit cartesian product between `a` and `b`
    pub fn add_cross(&mut self, a: usize, b: usize) {
        self.edges.entry((a.min(b), a.max(b))).or_insert(JoinEdge {
            selectivity: 1.0,
            equi: false,
            predicates: Vec::new(),
        });
    }

    /// A predicate over every relation in `mask`
    pub fn add_hyperedge(&mut self, mask: u64, selectivity: f64) {
        self.hyperedges.push((mask, selectivity.clamp(0.0, 1.0)));
    }

    #[must_use]
    pub fn edge(&self, a: usize, b: usize) -> Option<&JoinEdge> {
        self.edges.get(&(a.min(b), a.max(b)))
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Connected components (union-find), each sorted, ordered by first member
    #[must_use]
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut parent: Vec<usize> = (0..self.len()).collect();
        fn find(parent: &mut [usize], x: usize) -> usize {
            let mut root = x;
            while parent[root] != root {
                root = parent[root];
            }
            let mut cur = x;
            while parent[cur] != root {
                let next = parent[cur];
                parent[cur] = root;
                cur = next;
            }
            root
        }
        let pairs = self.edges.keys().copied().chain(self.hyperedges.iter().flat_map(|(mask, _)| {
            let first = mask.trailing_zeros() as usize;
            members(*mask).map(move |m| (first, m))
        }));
        for (a, b) in pairs {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                parent[ra.max(rb)] = ra.min(rb);
            }
        }
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.len() {
            let root = find(&mut parent, i);
            groups.entry(root).or_default().push(i);
        }
        groups.into_values().collect()
    }

    #[must_use]
    pub fn cardinality(&self, mask: u64) -> f64 {
        let base: f64 = (0..self.len())
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| self.cardinalities[i])
            .product();
        let selectivity: f64 = self
            .edges
            .iter()
            .filter(|((a, b), _)| mask & (1 << a) != 0 && mask & (1 << b) != 0)
            .map(|(_, e)| e.selectivity)
            .chain(self.hyperedges.iter().filter(|(h, _)| mask & h == *h).map(|(_, s)| *s))
            .product();
        (base * selectivity).max(1.0)
    }

    /// `None` when no edge links the two sets; otherwise whether one is an equality
    fn link(&self, left: u64, right: u64) -> Option<bool> {
        let mut linked = None;
        for ((a, b), edge) in &self.edges {
            let (ma, mb) = (1u64 << a, 1u64 << b);
            if (left & ma != 0 && right & mb != 0) || (left & mb != 0 && right & ma != 0) {
                linked = Some(linked.unwrap_or(false) || edge.equi);
            }
        }
        // members of a hyperedge may be combined before the predicate applies
        if linked.is_none() && self.hyperedges.iter().any(|(h, _)| h & left != 0 && h & right != 0) {
            linked = Some(false);
        }
        linked
    }

    fn is_connected(&self, mask: u64) -> bool {
        let start = mask.trailing_zeros();
        let mut seen = 1u64 << start;
        let mut frontier = seen;
        while frontier != 0 {
            let mut next = 0u64;
            for ((a, b), _) in &self.edges {
                let (ma, mb) = (1u64 << a, 1u64 << b);
                if mask & ma == 0 || mask & mb == 0 {
                    continue;
                }
                if frontier & ma != 0 && seen & mb == 0 {
                    next |= mb;
                }
                if frontier & mb != 0 && seen & ma == 0 {
                    next |= ma;
                }
            }
            for (h, _) in &self.hyperedges {
                let inside = h & mask;
                if inside & frontier != 0 {
                    next |= inside & !seen;
                }
            }
            seen |= next;
            frontier = next;
        }
        seen == mask
    }

    /// Cost of joining two already-costed inputs
    fn join_step(&self, left: u64, right: u64, config: &PlannerConfig) -> Option<f64> {
        let equi = self.link(left, right)?;
        let inputs = JoinInputs {
            left_rows: self.cardinality(left),
            right_rows: self.cardinality(right),
            equi,
            ordered: false,
            indexed_inner: false,
            kind: PhysicalJoinKind::Inner,
        };
        let algorithm = choose_algorithm(&inputs, config);
        Some(self.cardinality(left | right) * config.row_cost + input_cost(algorithm, &inputs))
    }

    fn leaf_cost(&self, i: usize, config: &PlannerConfig) -> f64 {
        self.cardinalities[i] * config.row_cost
    }

    /// Cost of the left-deep plan joining relations in `order`, or `None`
    /// if some prefix would need a cartesian product the graph does not allow
    #[must_use]
    pub fn left_deep_cost(&self, order: &[usize], config: &PlannerConfig) -> Option<f64> {
        let (&first, rest) = order.split_first()?;
        let mut mask = 1u64 << first;
        let mut cost = self.leaf_cost(first, config);
        for &next in rest {
            let leaf = 1u64 << next;
            cost += self.leaf_cost(next, config) + self.join_step(mask, leaf, config)?;
            mask |= leaf;
        }
        Some(cost)
    }

    /// Best order: exhaustive up to `dp_table_limit` relations, greedy above
    pub fn best_order(&self, config: &PlannerConfig) -> Result<JoinOrder, DatabaseError> {
        if self.is_empty() {
            return Err(DatabaseError::PlanningError("empty join region".to_string()));
        }
        if self.components().len() > 1 {
            return Err(DatabaseError::PlanningError(
                "join graph is disconnected; use CROSS JOIN for a cartesian product".to_string(),
            ));
        }
        let order = if self.len() <= config.dp_table_limit.min(MAX_DP_RELATIONS) {
            self.dynamic_programming(config)?
        } else {
            self.greedy(config)?
        };
        debug!(relations = self.len(), cost = order.cost, rows = order.rows, "join order chosen");
        Ok(order)
    }

    fn dynamic_programming(&self, config: &PlannerConfig) -> Result<JoinOrder, DatabaseError> {
        let n = self.len();
        let full: u64 = (1u64 << n) - 1;
        let mut best: Vec<Option<Best>> = vec![None; 1usize << n];
        for i in 0..n {
            best[1usize << i] = Some(Best {
                cost: self.leaf_cost(i, config),
                rows: self.cardinalities[i],
                left: 0,
                right: 0,
            });
        }

        for mask in 1..=full {
            if mask.count_ones() < 2 || !self.is_connected(mask) {
                continue;
            }
            let rows = self.cardinality(mask);
            let mut chosen: Option<Best> = None;
            let mut sub = (mask - 1) & mask;
            while sub != 0 {
                let other = mask ^ sub;
                if let (Some(l), Some(r)) = (best[sub as usize], best[other as usize]) {
                    if let Some(step) = self.join_step(sub, other, config) {
                        let candidate = Best {
                            cost: l.cost + r.cost + step,
                            rows,
                            left: sub,
                            right: other,
                        };
                        if chosen.is_none_or(|c| self.dp_better(&candidate, &c)) {
                            chosen = Some(candidate);
                        }
                    }
                }
                sub = (sub - 1) & mask;
            }
            best[mask as usize] = chosen;
        }

        let root = best[full as usize]
            .ok_or_else(|| DatabaseError::PlanningError("no join order covers every relation".to_string()))?;
        Ok(JoinOrder {
            tree: Self::rebuild(&best, full),
            cost: root.cost,
            rows: root.rows,
        })
    }

    /// Lower cost wins; ties go to the smaller left input, then to the left
    /// input holding the lowest relation index
    fn dp_better(&self, candidate: &Best, current: &Best) -> bool {
        let tolerance = 1e-9 * current.cost.abs().max(1.0);
        if (candidate.cost - current.cost).abs() > tolerance {
            return candidate.cost < current.cost;
        }
        let (cl, ol) = (self.cardinality(candidate.left), self.cardinality(current.left));
        if (cl - ol).abs() > 1e-9 * ol.max(1.0) {
            return cl < ol;
        }
        candidate.left.trailing_zeros() < current.left.trailing_zeros()
    }

    fn rebuild(best: &[Option<Best>], mask: u64) -> JoinTree {
        if mask.count_ones() == 1 {
            return JoinTree::Leaf(mask.trailing_zeros() as usize);
        }
        match best[mask as usize] {
            Some(b) if b.left != 0 => JoinTree::Join(
                Box::new(Self::rebuild(best, b.left)),
                Box::new(Self::rebuild(best, b.right)),
            ),
            _ => JoinTree::Leaf(mask.trailing_zeros() as usize),
        }
    }

    fn greedy(&self, config: &PlannerConfig) -> Result<JoinOrder, DatabaseError> {
        let n = self.len();
        let start = (0..n)
            .min_by(|&a, &b| {
                self.cardinalities[a]
                    .total_cmp(&self.cardinalities[b])
                    .then(a.cmp(&b))
            })
            .ok_or_else(|| DatabaseError::PlanningError("empty join region".to_string()))?;

        let mut tree = JoinTree::Leaf(start);
        let mut mask = 1u64 << start;
        let mut cost = self.leaf_cost(start, config);

        for _ in 1..n {
            let remaining: Vec<usize> = (0..n).filter(|i| mask & (1 << i) == 0).collect();
            let next = remaining
                .into_iter()
                .filter(|&i| self.link(mask, 1 << i).is_some())
                .min_by(|&a, &b| {
                    let ca = self.cardinality(mask | (1 << a)) * config.row_cost;
                    let cb = self.cardinality(mask | (1 << b)) * config.row_cost;
                    ca.total_cmp(&cb)
                        .then(self.cardinalities[a].total_cmp(&self.cardinalities[b]))
                        .then(a.cmp(&b))
                })
                .ok_or_else(|| DatabaseError::PlanningError("join graph is disconnected".to_string()))?;

            let leaf = 1u64 << next;
            let step = self
                .join_step(mask, leaf, config)
                .ok_or_else(|| DatabaseError::PlanningError("join graph is disconnected".to_string()))?;
            cost += self.leaf_cost(next, config) + step;
            mask |= leaf;
            tree = JoinTree::Join(Box::new(tree), Box::new(JoinTree::Leaf(next)));
        }

        Ok(JoinOrder {
            tree,
            cost,
            rows: self.cardinality(mask),
        })
    }
}

fn members(mask: u64) -> impl Iterator<Item = usize> {
    (0..MAX_RELATIONS).filter(move |i| mask & (1 << i) != 0)
}
