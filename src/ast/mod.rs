/// Validated syntax tree handed over by the parser/binder
///
/// Every identifier is already bound to a catalog entity or relation alias and
/// every literal is typed. The tree is serde-deserializable so a front end (or
/// a statement script) can deliver it as JSON.
pub mod expr;
pub mod logical;
pub mod statement;

pub use expr::{BinaryOp, ColumnRef, Expr, conjoin, split_conjunction};
pub use logical::{
    AggregateExpr, AggregateFunction, JoinKind, LogicalPlan, ProjectItem, ValuesColumn,
};
pub use statement::{
    AlterTableOperation, Assignment, ColumnDef, InsertSource, MergeAction, MergeClause,
    MergeMatch, MergeSource, MergeStatement, SchemaRef, Statement, TableAlias, TableConstraint,
};
