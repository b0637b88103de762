// Integration tests for query planning and execution
mod common;

use std::collections::HashSet;

use common::{Harness, create_table, employee_scenario, insert, int, key_value_table, text};
use relcore::ast::{AggregateExpr, AggregateFunction, BinaryOp, ColumnDef, JoinKind};
use relcore::planner::Planner;
use relcore::planner::physical::Operator;
use relcore::{CancellationToken, DataType, Expr, LogicalPlan, QueryResult, Statement, Value};

/// `a(k, tag)` with a NULL key and `b(k)` holding a NULL among its keys
fn nullable_keys() -> Harness {
    let mut h = Harness::new();
    h.run(create_table(
        "a",
        vec![ColumnDef::new("k", DataType::Integer), ColumnDef::new("tag", DataType::Text)],
        vec![],
    ));
    h.run(create_table("b", vec![ColumnDef::new("k", DataType::Integer)], vec![]));
    h.run(insert(
        "a",
        vec![
            vec![int(1), text("one")],
            vec![int(2), text("two")],
            vec![Value::Null, text("none")],
        ],
    ));
    h.run(insert("b", vec![vec![int(2)], vec![Value::Null], vec![int(3)]]));
    h
}

fn tags(query: LogicalPlan) -> LogicalPlan {
    query.project(vec![(Expr::col("a", "tag"), "tag")])
}

#[test]
fn test_not_exists_agrees_with_left_join_is_null() {
    let mut h = nullable_keys();
    let not_exists = tags(LogicalPlan::scan("a", "a").filter(Expr::exists(
        LogicalPlan::scan("b", "b").filter(Expr::eq(Expr::col("b", "k"), Expr::col("a", "k"))),
        true,
    )));
    let left_join = tags(
        LogicalPlan::scan("a", "a")
            .join(
                LogicalPlan::scan("b", "b"),
                JoinKind::Left,
                Some(Expr::eq(Expr::col("a", "k"), Expr::col("b", "k"))),
            )
            .filter(Expr::col("b", "k").is_null()),
    );

    let via_exists = h.rows(not_exists);
    assert_eq!(via_exists, vec![vec![text("none")], vec![text("one")]]);
    assert_eq!(h.rows(left_join), via_exists);
}

#[test]
fn test_not_in_with_null_in_subquery_is_empty() {
    let mut h = nullable_keys();
    let query = tags(LogicalPlan::scan("a", "a").filter(Expr::in_subquery(
        Expr::col("a", "k"),
        LogicalPlan::scan("b", "b").project(vec![(Expr::col("b", "k"), "k")]),
        true,
    )));
    assert!(h.rows(query).is_empty());

    let positive = tags(LogicalPlan::scan("a", "a").filter(Expr::in_subquery(
        Expr::col("a", "k"),
        LogicalPlan::scan("b", "b").project(vec![(Expr::col("b", "k"), "k")]),
        false,
    )));
    assert_eq!(h.rows(positive), vec![vec![text("two")]]);
}

#[test]
fn test_scalar_subquery_comparison() {
    let mut h = nullable_keys();
    let smallest = LogicalPlan::scan("b", "b").aggregate(
        vec![],
        vec![AggregateExpr {
            func: AggregateFunction::Min,
            arg: Some(Expr::col("b", "k")),
            alias: "m".to_string(),
        }],
    );
    let query = tags(
        LogicalPlan::scan("a", "a").filter(Expr::eq(Expr::col("a", "k"), Expr::ScalarSubquery(Box::new(smallest)))),
    );
    assert_eq!(h.rows(query), vec![vec![text("two")]]);
}

#[test]
fn test_group_by_country() {
    let mut h = employee_scenario();
    let query = LogicalPlan::scan("employee", "e").aggregate(
        vec![Expr::col("e", "country_code")],
        vec![AggregateExpr {
            func: AggregateFunction::Count,
            arg: None,
            alias: "n".to_string(),
        }],
    );
    assert_eq!(
        h.rows(query),
        vec![
            vec![text("AU"), int(1)],
            vec![text("FI"), int(2)],
            vec![text("UK"), int(1)],
        ]
    );
}

/// `a.c_id -> c.id`, `b.a_id -> a.id`, `c.b_id -> b.id`
fn cyclic_tables() -> Harness {
    let mut h = Harness::new();
    for (table, fk) in [("a", "c_id"), ("b", "a_id"), ("c", "b_id")] {
        h.run(create_table(
            table,
            vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new(fk, DataType::Integer),
            ],
            vec![],
        ));
    }
    h.run(insert("a", vec![vec![int(1), int(1)], vec![int(2), int(2)]]));
    h.run(insert("b", vec![vec![int(1), int(1)], vec![int(2), int(2)]]));
    h.run(insert("c", vec![vec![int(1), int(1)], vec![int(2), int(1)]]));
    h
}

fn cyclic_join() -> LogicalPlan {
    LogicalPlan::scan("a", "a")
        .inner_join(LogicalPlan::scan("b", "b"), Expr::eq(Expr::col("a", "id"), Expr::col("b", "a_id")))
        .inner_join(LogicalPlan::scan("c", "c"), Expr::eq(Expr::col("b", "id"), Expr::col("c", "b_id")))
        .filter(Expr::eq(Expr::col("c", "id"), Expr::col("a", "c_id")))
        .project(vec![
            (Expr::col("a", "id"), "a"),
            (Expr::col("b", "id"), "b"),
            (Expr::col("c", "id"), "c"),
        ])
}

#[test]
fn test_cyclic_join_visits_each_table_once() {
    let mut h = cyclic_tables();
    assert_eq!(h.rows(cyclic_join()), vec![vec![int(1), int(1), int(1)]]);

    let catalog = h.engine.catalog();
    let cancel = CancellationToken::new();
    let plan = Planner::new(&catalog, &h.session, h.engine.store(), h.engine.config(), &cancel)
        .plan(&cyclic_join())
        .unwrap();
    let scanned: Vec<String> = plan
        .reachable()
        .into_iter()
        .filter_map(|id| match &plan.node(id).operator {
            Operator::SeqScan { table, .. } => Some(table.name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(scanned.len(), 3);
    assert_eq!(scanned.iter().collect::<HashSet<_>>().len(), 3);
}

#[test]
fn test_explain_reports_join_algorithms() {
    let mut h = cyclic_tables();
    let QueryResult::Plan(tree) = h.run(Statement::Explain(cyclic_join())) else {
        panic!("EXPLAIN returns a plan tree");
    };
    let joins: Vec<_> = tree.walk().into_iter().filter(|n| n.operator == "InnerJoin").collect();
    assert_eq!(joins.len(), 2);
    assert!(joins.iter().all(|n| n.algorithm.is_some()));

    let json = serde_json::to_string(&tree).unwrap();
    assert!(json.contains("InnerJoin"));
}

#[test]
fn test_disconnected_tables_need_cross_join() {
    let mut h = cyclic_tables();
    let implicit = LogicalPlan::scan("a", "a").join(LogicalPlan::scan("b", "b"), JoinKind::Inner, None);
    assert!(h.try_run(Statement::Query(implicit)).is_err());

    let cross = LogicalPlan::scan("a", "a").join(LogicalPlan::scan("b", "b"), JoinKind::Cross, None);
    assert_eq!(h.rows(cross).len(), 4);
}

fn four_key_tables() -> Harness {
    let mut h = Harness::new();
    key_value_table(&mut h, "a", &[(1, "a1"), (2, "a2")]);
    key_value_table(&mut h, "b", &[(1, "b1"), (2, "b2")]);
    key_value_table(&mut h, "c", &[(1, "c1"), (3, "c3")]);
    key_value_table(&mut h, "d", &[(1, "d1"), (3, "d3")]);
    h
}

#[test]
fn test_cross_join_only_connects_its_own_inputs() {
    let mut h = four_key_tables();
    let crossed = LogicalPlan::scan("a", "a").join(LogicalPlan::scan("b", "b"), JoinKind::Cross, None);
    let joined = LogicalPlan::scan("c", "c").inner_join(
        LogicalPlan::scan("d", "d"),
        Expr::eq(Expr::col("c", "k"), Expr::col("d", "k")),
    );

    let implicit = crossed.clone().join(joined.clone(), JoinKind::Inner, None);
    let err = h.try_run(Statement::Query(implicit)).unwrap_err();
    assert!(matches!(err, relcore::DatabaseError::PlanningError(_)), "{err}");

    let explicit = crossed.join(joined, JoinKind::Cross, None);
    assert_eq!(h.rows(explicit).len(), 8);
}

#[test]
fn test_predicate_over_three_tables_connects_them() {
    let mut h = four_key_tables();
    let query = LogicalPlan::scan("a", "a")
        .join(LogicalPlan::scan("b", "b"), JoinKind::Inner, None)
        .join(
            LogicalPlan::scan("c", "c"),
            JoinKind::Inner,
            Some(Expr::eq(
                Expr::binary(BinaryOp::Plus, Expr::col("a", "k"), Expr::col("b", "k")),
                Expr::col("c", "k"),
            )),
        )
        .project(vec![(Expr::col("a", "k"), "a"), (Expr::col("b", "k"), "b")]);
    assert_eq!(h.rows(query), vec![vec![int(1), int(2)], vec![int(2), int(1)]]);
}
