// Integration tests for row-level statements: INSERT, UPDATE, DELETE, MERGE
mod common;

use common::{
    Harness, add_countries, create_table, employee_scenario, foreign_key, insert, int, key_value_table, text,
};
use relcore::ast::{
    Assignment, ColumnDef, InsertSource, MergeAction, MergeClause, MergeMatch, MergeSource, MergeStatement,
    TableAlias,
};
use relcore::types::ObjectName;
use relcore::{DataType, DatabaseError, Expr, LogicalPlan, Statement, Value};

fn key_values(h: &mut Harness, table: &str) -> Vec<Vec<Value>> {
    h.rows(LogicalPlan::scan(table, "x").project(vec![(Expr::col("x", "k"), "k"), (Expr::col("x", "v"), "v")]))
}

fn upsert(target: &str, source: MergeSource, clauses: Vec<MergeClause>) -> Statement {
    Statement::Merge(MergeStatement {
        target: TableAlias::new(target, "t"),
        source,
        source_alias: "s".to_string(),
        on: Expr::eq(Expr::col("t", "k"), Expr::col("s", "k")),
        clauses,
    })
}

fn update_from_source() -> MergeClause {
    MergeClause {
        kind: MergeMatch::Matched,
        condition: None,
        action: MergeAction::Update(vec![Assignment::new("v", Expr::col("s", "v"))]),
    }
}

fn insert_from_source() -> MergeClause {
    MergeClause {
        kind: MergeMatch::NotMatched,
        condition: None,
        action: MergeAction::Insert {
            columns: None,
            values: vec![Expr::col("s", "k"), Expr::col("s", "v")],
        },
    }
}

#[test]
fn test_delete_by_country_keeps_the_rest() {
    let mut h = employee_scenario();
    let result = h.run(Statement::Delete {
        target: TableAlias::new("employee", "e"),
        using: None,
        filter: Some(Expr::eq(Expr::col("e", "country_code"), Expr::lit(text("FI")))),
    });
    assert_eq!(result.affected(), Some(2));

    let codes = h.rows(LogicalPlan::scan("employee", "e").project(vec![(Expr::col("e", "country_code"), "c")]));
    assert_eq!(codes, vec![vec![text("AU")], vec![text("UK")]]);
}

#[test]
fn test_delete_using_removes_exactly_matching_keys() {
    let mut h = Harness::new();
    key_value_table(&mut h, "t", &[(1, "a"), (2, "b"), (3, "c"), (4, "d"), (5, "e")]);
    key_value_table(&mut h, "s", &[(2, "x"), (4, "y"), (9, "z")]);

    let result = h.run(Statement::Delete {
        target: TableAlias::new("t", "t"),
        using: Some(TableAlias::new("s", "s")),
        filter: Some(Expr::eq(Expr::col("t", "k"), Expr::col("s", "k"))),
    });
    assert_eq!(result.affected(), Some(2));
    assert_eq!(
        key_values(&mut h, "t"),
        vec![vec![int(1), text("a")], vec![int(3), text("c")], vec![int(5), text("e")]]
    );
    assert_eq!(h.row_count("s"), 3);
}

#[test]
fn test_merge_with_disjoint_keys_is_a_union() {
    let mut h = Harness::new();
    key_value_table(&mut h, "t", &[(1, "a"), (2, "b")]);
    key_value_table(&mut h, "s", &[(3, "c"), (4, "d")]);

    let result = h.run(upsert(
        "t",
        MergeSource::Table(ObjectName::from("s")),
        vec![update_from_source(), insert_from_source()],
    ));
    assert_eq!(result.affected(), Some(2));
    assert_eq!(
        key_values(&mut h, "t"),
        vec![
            vec![int(1), text("a")],
            vec![int(2), text("b")],
            vec![int(3), text("c")],
            vec![int(4), text("d")],
        ]
    );
}

#[test]
fn test_merge_with_subset_keys_replaces_values() {
    let mut h = Harness::new();
    key_value_table(&mut h, "t", &[(1, "a"), (2, "b"), (3, "c")]);
    key_value_table(&mut h, "s", &[(1, "x"), (3, "z")]);

    h.run(upsert(
        "t",
        MergeSource::Table(ObjectName::from("s")),
        vec![update_from_source(), insert_from_source()],
    ));
    assert_eq!(h.row_count("t"), 3);
    assert_eq!(
        key_values(&mut h, "t"),
        vec![vec![int(1), text("x")], vec![int(2), text("b")], vec![int(3), text("z")]]
    );
}

#[test]
fn test_merge_clause_order_and_conditions() {
    let mut h = Harness::new();
    key_value_table(&mut h, "t", &[(1, "a"), (2, "b"), (3, "c")]);
    key_value_table(&mut h, "s", &[(1, "drop"), (2, "keep")]);

    let delete_flagged = MergeClause {
        kind: MergeMatch::Matched,
        condition: Some(Expr::eq(Expr::col("s", "v"), Expr::lit(text("drop")))),
        action: MergeAction::Delete,
    };
    let remove_unsourced = MergeClause {
        kind: MergeMatch::NotMatchedBySource,
        condition: None,
        action: MergeAction::Delete,
    };
    let result = h.run(upsert(
        "t",
        MergeSource::Table(ObjectName::from("s")),
        vec![delete_flagged, update_from_source(), remove_unsourced],
    ));
    assert_eq!(result.affected(), Some(3));
    assert_eq!(key_values(&mut h, "t"), vec![vec![int(2), text("keep")]]);
}

#[test]
fn test_merge_from_query_source() {
    let mut h = Harness::new();
    key_value_table(&mut h, "t", &[(1, "a")]);
    key_value_table(&mut h, "staging", &[(1, "new"), (2, "other")]);

    let source = LogicalPlan::scan("staging", "st")
        .filter(Expr::eq(Expr::col("st", "k"), Expr::lit(int(2))))
        .project(vec![(Expr::col("st", "k"), "k"), (Expr::col("st", "v"), "v")]);
    h.run(upsert("t", MergeSource::Query(source), vec![update_from_source(), insert_from_source()]));
    assert_eq!(key_values(&mut h, "t"), vec![vec![int(1), text("a")], vec![int(2), text("other")]]);
}

#[test]
fn test_merge_ambiguous_match_changes_nothing() {
    let mut h = Harness::new();
    key_value_table(&mut h, "t", &[(1, "a"), (2, "b")]);
    h.run(create_table(
        "s",
        vec![ColumnDef::new("k", DataType::Integer), ColumnDef::new("v", DataType::Text)],
        vec![],
    ));
    h.run(insert("s", vec![vec![int(1), text("x")], vec![int(1), text("y")]]));

    let err = h
        .try_run(upsert(
            "t",
            MergeSource::Table(ObjectName::from("s")),
            vec![update_from_source(), insert_from_source()],
        ))
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ConstraintViolation(_)), "{err}");
    assert_eq!(key_values(&mut h, "t"), vec![vec![int(1), text("a")], vec![int(2), text("b")]]);
}

#[test]
fn test_update_evaluates_against_old_row() {
    let mut h = Harness::new();
    h.run(create_table(
        "counter",
        vec![
            ColumnDef::new("k", DataType::Integer).primary_key(),
            ColumnDef::new("a", DataType::Integer),
            ColumnDef::new("b", DataType::Integer),
        ],
        vec![],
    ));
    h.run(insert("counter", vec![vec![int(1), int(10), int(20)]]));

    // swap a and b
    h.run(Statement::Update {
        target: TableAlias::new("counter", "c"),
        assignments: vec![
            Assignment::new("a", Expr::col("c", "b")),
            Assignment::new("b", Expr::col("c", "a")),
        ],
        filter: None,
    });
    let rows = h.rows(LogicalPlan::scan("counter", "c"));
    assert_eq!(rows, vec![vec![int(1), int(20), int(10)]]);
}

#[test]
fn test_update_into_duplicate_key_is_rejected() {
    let mut h = Harness::new();
    key_value_table(&mut h, "t", &[(1, "a"), (2, "b")]);
    let err = h
        .try_run(Statement::Update {
            target: TableAlias::new("t", "t"),
            assignments: vec![Assignment::new("k", Expr::lit(int(2)))],
            filter: Some(Expr::eq(Expr::col("t", "k"), Expr::lit(int(1)))),
        })
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ConstraintViolation(_)), "{err}");
    assert_eq!(key_values(&mut h, "t"), vec![vec![int(1), text("a")], vec![int(2), text("b")]]);
}

#[test]
fn test_insert_select_with_column_list() {
    let mut h = employee_scenario();
    key_value_table(&mut h, "ids", &[]);
    let result = h.run(Statement::Insert {
        table: ObjectName::from("ids"),
        columns: Some(vec!["k".to_string()]),
        source: InsertSource::Query(
            LogicalPlan::scan("employee", "e").project(vec![(Expr::col("e", "employee_id"), "id")]),
        ),
    });
    assert_eq!(result.affected(), Some(4));
    let rows = key_values(&mut h, "ids");
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| row[1] == Value::Null));
}

#[test]
fn test_insert_error_names_first_bad_row() {
    let mut h = employee_scenario();
    let err = h
        .try_run(insert(
            "employee",
            vec![vec![int(10), text("Ava"), text("UK")], vec![Value::Null, text("Nobody"), text("UK")]],
        ))
        .unwrap_err();
    assert!(err.to_string().contains("row 2"), "{err}");
    assert_eq!(h.row_count("employee"), 4);
}

#[test]
fn test_foreign_keys_guard_both_sides() {
    let mut h = Harness::new();
    add_countries(&mut h);
    h.run(create_table(
        "office",
        vec![
            ColumnDef::new("id", DataType::Integer).primary_key(),
            ColumnDef::new("country_code", DataType::Text),
        ],
        vec![foreign_key("country_code", "country")],
    ));
    h.run(insert("office", vec![vec![int(1), text("FI")], vec![int(2), Value::Null]]));

    let unknown = h.try_run(insert("office", vec![vec![int(3), text("SE")]])).unwrap_err();
    assert!(matches!(unknown, DatabaseError::ConstraintViolation(_)), "{unknown}");

    let referenced = h
        .try_run(Statement::Delete {
            target: TableAlias::new("country", "c"),
            using: None,
            filter: Some(Expr::eq(Expr::col("c", "code"), Expr::lit(text("FI")))),
        })
        .unwrap_err();
    assert!(matches!(referenced, DatabaseError::ConstraintViolation(_)), "{referenced}");

    let truncate = h
        .try_run(Statement::Truncate {
            table: ObjectName::from("country"),
        })
        .unwrap_err();
    assert!(matches!(truncate, DatabaseError::ConstraintViolation(_)), "{truncate}");

    // unreferenced countries can go
    let result = h.run(Statement::Delete {
        target: TableAlias::new("country", "c"),
        using: None,
        filter: Some(Expr::eq(Expr::col("c", "code"), Expr::lit(text("AU")))),
    });
    assert_eq!(result.affected(), Some(1));
    assert_eq!(h.row_count("country"), 2);
}
