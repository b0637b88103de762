// Module declarations
pub mod error;
pub mod value;
pub mod data_type;
pub mod cast;
pub mod name;
pub mod constraints;
pub mod column;
pub mod row;
pub mod statistics;
pub mod table;
pub mod database;

// Re-exports for convenience
pub use error::{DatabaseError, ObjectKind};
pub use value::{Value, ValueKey};
pub use data_type::DataType;
pub use cast::CastMode;
pub use name::{ObjectName, QualifiedName, SchemaName};
pub use constraints::{Constraint, ForeignKey};
pub use column::Column;
pub use row::{Row, RowId, TableHandle};
pub use statistics::{ColumnStatistics, TableStatistics};
pub use table::Table;
pub use database::{Database, Schema};

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;
    use rust_decimal::Decimal;

    fn employee_columns() -> Vec<Column> {
        vec![
            Column::new("employee_id", DataType::Integer, false, 0),
            Column::new("first_name", DataType::Text, true, 0),
        ]
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Integer(42).to_string(), "42");
        assert_eq!(Value::Real(3.5).to_string(), "3.5");
        assert_eq!(Value::Text("hello".to_string()).to_string(), "hello");
        assert_eq!(Value::Boolean(true).to_string(), "true");
    }

    #[test]
    fn test_value_as_int() {
        assert_eq!(Value::Integer(42).as_int(), Some(42));
        assert_eq!(Value::SmallInt(7).as_int(), Some(7));
        assert_eq!(Value::Text("hello".to_string()).as_int(), None);
        assert_eq!(Value::Null.as_int(), None);
    }

    #[test]
    fn test_numeric_keys_unify() {
        assert_eq!(Value::Integer(1).key(), Value::Real(1.0).key());
        assert_eq!(Value::Integer(1).key(), Value::Numeric(Decimal::new(100, 2)).key());
        assert_ne!(Value::Integer(1).key(), Value::Text("1".to_string()).key());
    }

    #[test]
    fn test_sql_cmp_null_is_unknown() {
        assert_eq!(Value::Null.sql_cmp(&Value::Integer(1)).unwrap(), None);
        assert_eq!(
            Value::Integer(2).sql_cmp(&Value::Real(1.5)).unwrap(),
            Some(Ordering::Greater)
        );
        assert!(Value::Integer(2).sql_cmp(&Value::Text("2".to_string())).is_err());
    }

    #[test]
    fn test_table_renumbers_ordinals() {
        let name = QualifiedName::new("memory", "main", "employee");
        let table = Table::new(name, employee_columns(), vec![], TableHandle(1));
        assert_eq!(table.columns[1].ordinal, 1);
        assert_eq!(table.get_column_index("first_name"), Some(1));
        assert_eq!(table.get_column_index("age"), None);
    }

    #[test]
    fn test_primary_key_indices() {
        let name = QualifiedName::new("memory", "main", "employee");
        let pk = Constraint::PrimaryKey {
            columns: vec!["employee_id".to_string()],
        };
        let table = Table::new(name, employee_columns(), vec![pk], TableHandle(1));
        assert_eq!(table.primary_key_indices(), vec![0]);
        assert!(table.is_constrained("employee_id"));
        assert!(!table.is_constrained("first_name"));
    }

    #[test]
    fn test_object_name_from_dotted() {
        let name = ObjectName::from("s.employee");
        assert_eq!(name.schema.as_deref(), Some("s"));
        assert_eq!(name.name, "employee");
        assert_eq!(ObjectName::from("db.s.t").database.as_deref(), Some("db"));
    }
}
