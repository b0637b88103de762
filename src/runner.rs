/// Script runner - executes a JSON array of statements and renders results
use std::io::Write;
use std::path::Path;

use comfy_table::{Cell, Table as ComfyTable, presets::UTF8_FULL};
use tracing::{info, warn};

use crate::ast::Statement;
use crate::catalog::Session;
use crate::engine::Engine;
use crate::executor::QueryResult;
use crate::types::DatabaseError;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Continue with the next statement after an error
    pub keep_going: bool,
    /// Print the physical plan of each query before its rows
    pub explain: bool,
}

/// Per-script tally
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: usize,
    pub failed: usize,
}

pub fn load_script(path: &Path) -> Result<Vec<Statement>, DatabaseError> {
    let text = std::fs::read_to_string(path)?;
    let statements: Vec<Statement> = serde_json::from_str(&text)?;
    info!(path = %path.display(), statements = statements.len(), "loaded script");
    Ok(statements)
}

/// Run `statements` in order, writing each result to `out`.
///
/// Stops at the first failing statement unless `keep_going` is set, in which
/// case failures are only counted.
pub fn run_script(
    engine: &Engine,
    session: &mut Session,
    statements: &[Statement],
    options: RunOptions,
    out: &mut dyn Write,
) -> Result<RunSummary, DatabaseError> {
    let mut summary = RunSummary::default();
    for (i, statement) in statements.iter().enumerate() {
        if let (true, Statement::Query(plan)) = (options.explain, statement) {
            let explained = engine.execute(session, &Statement::Explain(plan.clone()))?;
            write!(out, "{}", format_result(&explained))?;
        }
        match engine.execute(session, statement) {
            Ok(result) => {
                summary.executed += 1;
                write!(out, "{}", format_result(&result))?;
            }
            Err(err) => {
                summary.failed += 1;
                warn!(statement = i + 1, error = %err, "statement failed");
                writeln!(out, "ERROR (statement {}): {err}", i + 1)?;
                if !options.keep_going {
                    return Err(err);
                }
            }
        }
    }
    Ok(summary)
}

pub fn format_result(result: &QueryResult) -> String {
    match result {
        QueryResult::Success(msg) => format!("{msg}\n"),
        QueryResult::Affected(n) => format!("{n} rows affected\n"),
        QueryResult::Rows(rows, columns) => {
            if rows.is_empty() {
                return "(0 rows)\n".to_string();
            }

            let mut table = ComfyTable::new();
            table.load_preset(UTF8_FULL);
            table.set_header(columns.iter().map(Cell::new));
            for row in rows {
                table.add_row(row.iter().map(Cell::new));
            }

            format!("{table}\n({} rows)\n", rows.len())
        }
        QueryResult::Plan(tree) => match serde_json::to_string_pretty(tree) {
            Ok(json) => format!("{json}\n"),
            Err(err) => format!("<unprintable plan: {err}>\n"),
        },
    }
}
