use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use super::data_type::DataType;
use super::error::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    // Numeric types
    SmallInt(i16),
    Integer(i64),
    Real(f64),
    Numeric(Decimal),
    // String types
    Text(String),
    // Boolean
    Boolean(bool),
    // Date/Time types
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

/// Hashable, totally ordered form of a value.
///
/// All numeric variants collapse onto `Number`, so `Integer(1)`, `Real(1.0)`
/// and `Numeric(1.00)` produce the same key. Hash joins, sort-merge joins and
/// grouping all compare values through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    Null,
    Boolean(bool),
    Number(Decimal),
    /// Floats with no exact decimal form (NaN, infinities, huge magnitudes)
    Float(u64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::SmallInt(i) => Some(*i as i64),
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::SmallInt(_) | Self::Integer(_) | Self::Real(_) | Self::Numeric(_)
        )
    }

    /// Exact decimal form of a numeric value
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Self::SmallInt(i) => Some(Decimal::from(*i)),
            Self::Integer(i) => Some(Decimal::from(*i)),
            Self::Real(r) => Decimal::from_f64(*r),
            Self::Numeric(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::SmallInt(i) => Some(f64::from(*i)),
            Self::Integer(i) => Some(*i as f64),
            Self::Real(r) => Some(*r),
            Self::Numeric(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Position of the value on a number line, for range interpolation
    #[must_use]
    pub fn ordinal(&self) -> Option<f64> {
        match self {
            Self::Date(d) => Some(f64::from(d.num_days_from_ce())),
            Self::Timestamp(t) => Some(t.and_utc().timestamp() as f64),
            other => other.to_f64(),
        }
    }

    /// Type of a literal, used when inferring result shapes
    #[must_use]
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::SmallInt(_) => Some(DataType::SmallInt),
            Self::Integer(_) => Some(DataType::Integer),
            Self::Real(_) => Some(DataType::Real),
            Self::Numeric(d) => Some(DataType::Numeric {
                precision: 38,
                scale: d.scale() as u8,
            }),
            Self::Text(_) => Some(DataType::Text),
            Self::Boolean(_) => Some(DataType::Boolean),
            Self::Date(_) => Some(DataType::Date),
            Self::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    #[must_use]
    pub fn key(&self) -> ValueKey {
        match self {
            Self::Null => ValueKey::Null,
            Self::Boolean(b) => ValueKey::Boolean(*b),
            Self::Real(r) => Decimal::from_f64(*r)
                .map_or(ValueKey::Float(r.to_bits()), |d| ValueKey::Number(d.normalize())),
            Self::SmallInt(_) | Self::Integer(_) | Self::Numeric(_) => self
                .to_decimal()
                .map_or(ValueKey::Null, |d| ValueKey::Number(d.normalize())),
            Self::Text(s) => ValueKey::Text(s.clone()),
            Self::Date(d) => ValueKey::Date(*d),
            Self::Timestamp(t) => ValueKey::Timestamp(*t),
        }
    }

    /// SQL comparison: `None` when either side is NULL
    pub fn sql_cmp(&self, other: &Self) -> Result<Option<Ordering>, DatabaseError> {
        let ordering = match (self, other) {
            (Self::Null, _) | (_, Self::Null) => return Ok(None),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => Self::compare_numeric(a, b),
            (a, b) => {
                return Err(DatabaseError::TypeMismatch(format!(
                    "cannot compare {a:?} with {b:?}"
                )));
            }
        };
        Ok(Some(ordering))
    }

    fn compare_numeric(a: &Self, b: &Self) -> Ordering {
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            return x.cmp(&y);
        }
        if matches!(a, Self::Real(_)) || matches!(b, Self::Real(_)) {
            let x = a.to_f64().unwrap_or(f64::NAN);
            let y = b.to_f64().unwrap_or(f64::NAN);
            return x.total_cmp(&y);
        }
        match (a.to_decimal(), b.to_decimal()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::SmallInt(i) => write!(f, "{i}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Numeric(d) => write!(f, "{d}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}
