// Script runner and configuration loading against files on disk
mod common;

use std::io::Write;

use common::{create_table, insert, int, text};
use relcore::ast::ColumnDef;
use relcore::runner::{self, RunOptions, RunSummary};
use relcore::types::ObjectName;
use relcore::{DataType, DatabaseError, Engine, EngineConfig, Expr, LogicalPlan, Session, Statement};

fn script_file(statements: &[Statement]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(serde_json::to_string_pretty(statements).unwrap().as_bytes())
        .unwrap();
    file
}

fn country_script() -> Vec<Statement> {
    vec![
        create_table(
            "country",
            vec![
                ColumnDef::new("code", DataType::Text).primary_key(),
                ColumnDef::new("name", DataType::Text),
            ],
            vec![],
        ),
        insert("country", vec![vec![text("FI"), text("Finland")], vec![text("UK"), text("United Kingdom")]]),
        Statement::Query(
            LogicalPlan::scan("country", "c").filter(Expr::eq(Expr::col("c", "code"), Expr::lit(text("FI")))),
        ),
    ]
}

#[test]
fn test_script_round_trips_through_json() {
    let file = script_file(&country_script());
    let statements = runner::load_script(file.path()).unwrap();
    assert_eq!(statements, country_script());
}

#[test]
fn test_run_script_prints_results() {
    let statements = country_script();
    let engine = Engine::default();
    let mut session = Session::default();
    let mut out = Vec::new();
    let summary = runner::run_script(&engine, &mut session, &statements, RunOptions::default(), &mut out).unwrap();
    assert_eq!(summary, RunSummary { executed: 3, failed: 0 });

    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains("created successfully"));
    assert!(printed.contains("2 rows affected"));
    assert!(printed.contains("Finland"));
    assert!(!printed.contains("United Kingdom"));
}

#[test]
fn test_run_script_stops_at_first_error() {
    let mut statements = country_script();
    statements.insert(1, insert("country", vec![vec![int(1)]]));
    let engine = Engine::default();
    let mut session = Session::default();
    let mut out = Vec::new();
    let err = runner::run_script(&engine, &mut session, &statements, RunOptions::default(), &mut out).unwrap_err();
    assert!(matches!(err, DatabaseError::TypeMismatch(_)), "{err}");
    assert!(!String::from_utf8(out).unwrap().contains("Finland"));
}

#[test]
fn test_explain_option_prints_plan_json() {
    let statements = country_script();
    let engine = Engine::default();
    let mut session = Session::default();
    let mut out = Vec::new();
    let options = RunOptions {
        keep_going: false,
        explain: true,
    };
    runner::run_script(&engine, &mut session, &statements, options, &mut out).unwrap();
    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains("\"operator\": \"SeqScan\""));
}

#[test]
fn test_malformed_script_is_a_serialization_error() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    writeln!(file, "[{{\"NotAStatement\": {{}}}}]").unwrap();
    let err = runner::load_script(file.path()).unwrap_err();
    assert!(matches!(err, DatabaseError::Serialization(_)), "{err}");
}

#[test]
fn test_config_file_changes_planner_limits() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[planner]\ndp_table_limit = 2\n\n[execution]\ncancel_check_interval = 16").unwrap();
    let config = EngineConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.planner.dp_table_limit, 2);
    assert_eq!(config.execution.cancel_check_interval, 16);

    // a greedy-ordered engine still answers queries
    let engine = Engine::new(config);
    let mut session = Session::default();
    for statement in &country_script()[..2] {
        engine.execute(&mut session, statement).unwrap();
    }
    let described = engine
        .execute(
            &mut session,
            &Statement::Describe {
                name: ObjectName::from("country"),
            },
        )
        .unwrap();
    assert_eq!(described.rows().unwrap().len(), 2);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, DatabaseError::Config(_)), "{err}");
}
