// relcore - transactional catalog, DML executor and cost-guided join planner
// Consumes a validated AST; storage is reached through the TableStore trait

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::type_complexity)]

// Core structures (values, types, names, tables, errors)
pub mod core;

// Re-export all core types as types module
pub mod types {
    pub use crate::core::*;
}

// Validated syntax tree (statements, logical plans, expressions)
pub mod ast;

// Databases, schemas, tables and the session's current namespace
pub mod catalog;

// Storage boundary and the in-memory store
pub mod storage;

// Statement transactions, intents and cancellation
pub mod transaction;

// Logical to physical planning, join ordering, statistics
pub mod planner;

// DDL, DML, MERGE and query execution
pub mod executor;

// Statement routing over the shared catalog and store
pub mod engine;

// Engine configuration (TOML file + environment)
pub mod config;

// JSON statement scripts and result rendering
pub mod runner;

// Re-export commonly used types for convenience
pub use crate::ast::{Expr, LogicalPlan, Statement};
pub use crate::catalog::{Catalog, Session};
pub use crate::config::EngineConfig;
pub use crate::core::{Column, DataType, DatabaseError, Table, Value};
pub use crate::engine::Engine;
pub use crate::executor::QueryResult;
pub use crate::storage::{MemoryStore, TableStore};
pub use crate::transaction::CancellationToken;
