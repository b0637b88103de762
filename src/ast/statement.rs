use serde::{Deserialize, Serialize};

use super::expr::Expr;
use super::logical::LogicalPlan;
use crate::types::{DataType, ObjectName, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Column-level `PRIMARY KEY`
    #[serde(default)]
    pub primary_key: bool,
}

const fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    #[must_use]
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nullable: true,
            primary_key: false,
        }
    }

    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableConstraint {
    PrimaryKey(Vec<String>),
    ForeignKey {
        columns: Vec<String>,
        referenced_table: ObjectName,
        referenced_columns: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlterTableOperation {
    AddColumn(ColumnDef),
    DropColumn(String),
    /// `ALTER column SET DATA TYPE type`
    AlterColumnType { column: String, data_type: DataType },
    RenameColumn { old_name: String, new_name: String },
    RenameTable(String),
}

/// Schema reference; the database defaults to the session's
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub database: Option<String>,
    pub name: String,
}

impl SchemaRef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            database: None,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InsertSource {
    Values(Vec<Vec<Value>>),
    Query(LogicalPlan),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

impl Assignment {
    #[must_use]
    pub fn new(column: &str, value: Expr) -> Self {
        Self {
            column: column.to_string(),
            value,
        }
    }
}

/// Table plus the alias its columns are referenced by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableAlias {
    pub table: ObjectName,
    pub alias: String,
}

impl TableAlias {
    #[must_use]
    pub fn new(table: impl Into<ObjectName>, alias: &str) -> Self {
        Self {
            table: table.into(),
            alias: alias.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MergeSource {
    Table(ObjectName),
    Query(LogicalPlan),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMatch {
    Matched,
    NotMatched,
    NotMatchedBySource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MergeAction {
    Update(Vec<Assignment>),
    Delete,
    Insert {
        columns: Option<Vec<String>>,
        values: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeClause {
    pub kind: MergeMatch,
    /// Optional `AND condition` of the WHEN clause
    #[serde(default)]
    pub condition: Option<Expr>,
    pub action: MergeAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeStatement {
    pub target: TableAlias,
    pub source: MergeSource,
    pub source_alias: String,
    pub on: Expr,
    pub clauses: Vec<MergeClause>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    CreateDatabase {
        name: String,
        #[serde(default)]
        if_not_exists: bool,
    },
    DropDatabase {
        name: String,
        #[serde(default)]
        if_exists: bool,
    },
    CreateSchema {
        schema: SchemaRef,
        #[serde(default)]
        if_not_exists: bool,
    },
    DropSchema {
        schema: SchemaRef,
        #[serde(default)]
        if_exists: bool,
    },
    RenameSchema {
        schema: SchemaRef,
        new_name: String,
    },
    /// `USE database` / `USE schema` / `USE database.schema`
    Use {
        database: Option<String>,
        schema: Option<String>,
    },
    CreateTable {
        name: ObjectName,
        columns: Vec<ColumnDef>,
        #[serde(default)]
        constraints: Vec<TableConstraint>,
        #[serde(default)]
        if_not_exists: bool,
    },
    CreateTableAs {
        name: ObjectName,
        query: LogicalPlan,
    },
    DropTable {
        name: ObjectName,
        #[serde(default)]
        if_exists: bool,
    },
    AlterTable {
        name: ObjectName,
        operation: AlterTableOperation,
    },
    Describe {
        name: ObjectName,
    },
    ShowTables {
        schema: Option<SchemaRef>,
    },
    Insert {
        table: ObjectName,
        columns: Option<Vec<String>>,
        source: InsertSource,
    },
    Update {
        target: TableAlias,
        assignments: Vec<Assignment>,
        filter: Option<Expr>,
    },
    Delete {
        target: TableAlias,
        using: Option<TableAlias>,
        filter: Option<Expr>,
    },
    Truncate {
        table: ObjectName,
    },
    Merge(MergeStatement),
    Query(LogicalPlan),
    Explain(LogicalPlan),
}

impl Statement {
    /// Statements that only touch catalog metadata
    #[must_use]
    pub const fn is_ddl(&self) -> bool {
        matches!(
            self,
            Self::CreateDatabase { .. }
                | Self::DropDatabase { .. }
                | Self::CreateSchema { .. }
                | Self::DropSchema { .. }
                | Self::RenameSchema { .. }
                | Self::Use { .. }
                | Self::CreateTable { .. }
                | Self::DropTable { .. }
                | Self::AlterTable { .. }
                | Self::Describe { .. }
                | Self::ShowTables { .. }
        )
    }
}
