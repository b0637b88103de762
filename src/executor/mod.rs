/// Executor module - runs statements against the catalog and the store
///
/// Structure:
/// - conditions: expression evaluation with three-valued logic
/// - queries: physical plan execution (scans, filters, aggregates, subqueries)
/// - join: hash, nested-loop, index nested-loop and sort-merge joins
/// - dml: INSERT/UPDATE/DELETE/TRUNCATE and CREATE TABLE AS
/// - merge: MERGE INTO
/// - ddl: CREATE/DROP/ALTER/RENAME, DESCRIBE, SHOW TABLES, USE
pub mod conditions;
pub mod ddl;
pub mod dml;
mod join;
pub mod merge;
pub mod queries;

pub use conditions::ConditionEvaluator;
pub use ddl::DdlExecutor;
pub use dml::{DmlExecutor, DmlOutcome};
pub use merge::MergeExecutor;
pub use queries::{QueryExecutor, Tuple};

use serde::Serialize;

use crate::ast::{Expr, LogicalPlan};
use crate::catalog::{Catalog, Session};
use crate::config::EngineConfig;
use crate::planner::physical::{ExplainNode, PhysicalPlan};
use crate::planner::{Planner, Typed};
use crate::storage::TableStore;
use crate::transaction::CancellationToken;
use crate::types::{DatabaseError, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryResult {
    Success(String),
    /// Result rows and column names
    Rows(Vec<Vec<Value>>, Vec<String>),
    /// Rows inserted, updated or deleted
    Affected(usize),
    Plan(ExplainNode),
}

impl QueryResult {
    #[must_use]
    pub fn rows(&self) -> Option<&[Vec<Value>]> {
        match self {
            Self::Rows(rows, _) => Some(rows),
            _ => None,
        }
    }

    #[must_use]
    pub const fn affected(&self) -> Option<usize> {
        match self {
            Self::Affected(n) => Some(*n),
            _ => None,
        }
    }
}

/// Everything a statement reads while it runs
#[derive(Clone, Copy)]
pub struct StatementContext<'a> {
    pub catalog: &'a Catalog,
    pub store: &'a dyn TableStore,
    pub session: &'a Session,
    pub config: &'a EngineConfig,
    pub cancel: &'a CancellationToken,
}

impl<'a> StatementContext<'a> {
    fn planner(&self) -> Planner<'a> {
        Planner::new(self.catalog, self.session, self.store, self.config, self.cancel)
    }

    pub fn plan(&self, logical: &LogicalPlan) -> Result<PhysicalPlan, DatabaseError> {
        self.planner().plan(logical)
    }

    /// Plan `logical` and resolve `exprs` over its output row
    pub fn plan_with_exprs(
        &self,
        logical: &LogicalPlan,
        exprs: &[Expr],
    ) -> Result<(PhysicalPlan, Vec<Typed>), DatabaseError> {
        self.planner().plan_with_exprs(logical, exprs)
    }

    pub fn executor<'p>(&self, plan: &'p PhysicalPlan) -> QueryExecutor<'p>
    where
        'a: 'p,
    {
        QueryExecutor::new(plan, self.store, self.cancel, self.config.execution.cancel_check_interval)
    }

    /// Plan and run a query, returning its rows and output column names
    pub fn query(&self, logical: &LogicalPlan) -> Result<QueryResult, DatabaseError> {
        let plan = self.plan(logical)?;
        let rows = self.executor(&plan).execute()?;
        let columns = plan.schema().iter().map(|c| c.name.clone()).collect();
        Ok(QueryResult::Rows(rows, columns))
    }

    pub fn explain(&self, logical: &LogicalPlan) -> Result<QueryResult, DatabaseError> {
        Ok(QueryResult::Plan(self.plan(logical)?.explain_tree()))
    }
}
