use super::physical::{JoinAlgorithm, PhysicalJoinKind};
use crate::config::PlannerConfig;

/// What the planner knows about one join when picking its algorithm
#[derive(Debug, Clone, Copy)]
pub struct JoinInputs {
    pub left_rows: f64,
    pub right_rows: f64,
    /// At least one equality key pair
    pub equi: bool,
    /// Both inputs sorted on the join keys
    pub ordered: bool,
    /// The inner side is a base table whose primary key is the join key
    pub indexed_inner: bool,
    pub kind: PhysicalJoinKind,
}

/// Rows of the side that would be built (hashed or looped over)
#[must_use]
pub fn build_rows(inputs: &JoinInputs) -> f64 {
    match inputs.kind {
        PhysicalJoinKind::Inner => inputs.left_rows.min(inputs.right_rows),
        PhysicalJoinKind::Left | PhysicalJoinKind::Semi | PhysicalJoinKind::Anti => inputs.right_rows,
    }
}

#[must_use]
pub fn choose_algorithm(inputs: &JoinInputs, config: &PlannerConfig) -> JoinAlgorithm {
    if !inputs.equi {
        return JoinAlgorithm::NestedLoopJoin;
    }
    let small = build_rows(inputs);
    if small <= config.hash_build_row_budget as f64 {
        JoinAlgorithm::HashJoin
    } else if inputs.ordered && inputs.kind == PhysicalJoinKind::Inner {
        JoinAlgorithm::SortMergeJoin
    } else if small <= config.nested_loop_row_threshold as f64 {
        if inputs.indexed_inner {
            JoinAlgorithm::IndexNestedLoopJoin
        } else {
            JoinAlgorithm::NestedLoopJoin
        }
    } else {
        JoinAlgorithm::HashJoin
    }
}

/// Work done reading the inputs, excluding output rows
#[must_use]
pub fn input_cost(algorithm: JoinAlgorithm, inputs: &JoinInputs) -> f64 {
    let (l, r) = (inputs.left_rows.max(1.0), inputs.right_rows.max(1.0));
    match algorithm {
        JoinAlgorithm::HashJoin | JoinAlgorithm::SortMergeJoin => l + r,
        JoinAlgorithm::NestedLoopJoin => l * r,
        JoinAlgorithm::IndexNestedLoopJoin => {
            let (outer, inner) = if l <= r { (l, r) } else { (r, l) };
            outer * (inner.log2() + 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(left_rows: f64, right_rows: f64) -> JoinInputs {
        JoinInputs {
            left_rows,
            right_rows,
            equi: true,
            ordered: false,
            indexed_inner: false,
            kind: PhysicalJoinKind::Inner,
        }
    }

    #[test]
    fn test_small_build_side_hashes() {
        let config = PlannerConfig::default();
        assert_eq!(choose_algorithm(&inputs(10.0, 1e9), &config), JoinAlgorithm::HashJoin);
    }

    #[test]
    fn test_non_equi_uses_nested_loop() {
        let config = PlannerConfig::default();
        let mut i = inputs(10.0, 10.0);
        i.equi = false;
        assert_eq!(choose_algorithm(&i, &config), JoinAlgorithm::NestedLoopJoin);
    }

    #[test]
    fn test_over_budget_ordered_inputs_merge() {
        let config = PlannerConfig {
            hash_build_row_budget: 100,
            ..PlannerConfig::default()
        };
        let mut i = inputs(1000.0, 2000.0);
        i.ordered = true;
        assert_eq!(choose_algorithm(&i, &config), JoinAlgorithm::SortMergeJoin);
        i.kind = PhysicalJoinKind::Left;
        assert_eq!(choose_algorithm(&i, &config), JoinAlgorithm::HashJoin);
    }

    #[test]
    fn test_tiny_side_over_budget_uses_index_when_possible() {
        let config = PlannerConfig {
            hash_build_row_budget: 0,
            ..PlannerConfig::default()
        };
        let mut i = inputs(5.0, 5000.0);
        assert_eq!(choose_algorithm(&i, &config), JoinAlgorithm::NestedLoopJoin);
        i.indexed_inner = true;
        assert_eq!(choose_algorithm(&i, &config), JoinAlgorithm::IndexNestedLoopJoin);
    }

    #[test]
    fn test_left_join_builds_right() {
        let config = PlannerConfig {
            hash_build_row_budget: 100,
            ..PlannerConfig::default()
        };
        let mut i = inputs(10.0, 5000.0);
        i.kind = PhysicalJoinKind::Left;
        assert!((build_rows(&i) - 5000.0).abs() < f64::EPSILON);
        assert_eq!(choose_algorithm(&i, &config), JoinAlgorithm::HashJoin);
    }
}
