use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataType {
    // Numeric types
    SmallInt,
    Integer,
    Real,
    Numeric { precision: u8, scale: u8 }, // DECIMAL(p, s)
    // String types
    Text,
    Varchar { max_length: usize }, // VARCHAR(n)
    // Boolean
    Boolean,
    // Date/Time types
    Date,
    Timestamp,
}

impl DataType {
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::SmallInt | Self::Integer | Self::Real | Self::Numeric { .. }
        )
    }

    #[must_use]
    pub const fn is_textual(&self) -> bool {
        matches!(self, Self::Text | Self::Varchar { .. })
    }

    /// Types whose values sit on a number line (range selectivity interpolates)
    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        self.is_numeric() || matches!(self, Self::Date | Self::Timestamp)
    }

    /// Result type of arithmetic between two numeric types
    #[must_use]
    pub fn numeric_supertype(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Real, _) | (_, Self::Real) => Self::Real,
            (Self::Numeric { precision: p1, scale: s1 }, Self::Numeric { precision: p2, scale: s2 }) => {
                Self::Numeric {
                    precision: (*p1).max(*p2),
                    scale: (*s1).max(*s2),
                }
            }
            (n @ Self::Numeric { .. }, _) | (_, n @ Self::Numeric { .. }) => n.clone(),
            (Self::SmallInt, Self::SmallInt) => Self::SmallInt,
            _ => Self::Integer,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SmallInt => write!(f, "SMALLINT"),
            Self::Integer => write!(f, "INTEGER"),
            Self::Real => write!(f, "REAL"),
            Self::Numeric { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            Self::Text => write!(f, "TEXT"),
            Self::Varchar { max_length } => write!(f, "VARCHAR({max_length})"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Date => write!(f, "DATE"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}
