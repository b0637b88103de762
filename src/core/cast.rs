/// Value conversion rules
///
/// Every conversion here is lossless or fails: a value converts only when the
/// result represents exactly the same quantity. Precision loss (for example a
/// DECIMAL that would need rounding) counts as failure, never as truncation.
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use super::data_type::DataType;
use super::error::DatabaseError;
use super::value::Value;

/// Largest integer magnitude a REAL holds exactly
const MAX_EXACT_F64_INT: i64 = 1 << 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastMode {
    /// Implicit coercion on INSERT/UPDATE/MERGE: stays within a type family
    Assignment,
    /// Explicit conversion (ALTER ... SET DATA TYPE): may also parse text
    Conversion,
}

/// Convert `value` to `target`, or `None` if it is not exactly representable
#[must_use]
pub fn convert(value: &Value, target: &DataType, mode: CastMode) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }

    match target {
        DataType::SmallInt => to_integer(value, mode)
            .and_then(|i| i16::try_from(i).ok())
            .map(Value::SmallInt),
        DataType::Integer => to_integer(value, mode).map(Value::Integer),
        DataType::Real => to_real(value, mode).map(Value::Real),
        DataType::Numeric { precision, scale } => {
            to_decimal(value, mode).and_then(|d| fit_decimal(d, *precision, *scale)).map(Value::Numeric)
        }
        DataType::Text => to_text(value, mode).map(Value::Text),
        DataType::Varchar { max_length } => to_text(value, mode)
            .filter(|s| s.chars().count() <= *max_length)
            .map(Value::Text),
        DataType::Boolean => match value {
            Value::Boolean(b) => Some(Value::Boolean(*b)),
            Value::Text(s) if mode == CastMode::Conversion => parse_bool(s).map(Value::Boolean),
            _ => None,
        },
        DataType::Date => match value {
            Value::Date(d) => Some(Value::Date(*d)),
            Value::Timestamp(t) if t.time() == NaiveTime::default() => Some(Value::Date(t.date())),
            Value::Text(s) if mode == CastMode::Conversion => {
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok().map(Value::Date)
            }
            _ => None,
        },
        DataType::Timestamp => match value {
            Value::Timestamp(t) => Some(Value::Timestamp(*t)),
            Value::Date(d) => Some(Value::Timestamp(d.and_time(NaiveTime::default()))),
            Value::Text(s) if mode == CastMode::Conversion => parse_timestamp(s).map(Value::Timestamp),
            _ => None,
        },
    }
}

/// [`convert`] with the failure reported as a `TypeConversionError`
pub fn convert_for_column(
    value: &Value,
    target: &DataType,
    mode: CastMode,
    column: &str,
) -> Result<Value, DatabaseError> {
    convert(value, target, mode).ok_or_else(|| DatabaseError::TypeConversionError {
        column: column.to_string(),
        value: format!("'{value}'"),
        target: target.to_string(),
    })
}

fn to_integer(value: &Value, mode: CastMode) -> Option<i64> {
    match value {
        Value::SmallInt(i) => Some(i64::from(*i)),
        Value::Integer(i) => Some(*i),
        Value::Real(r) => {
            if r.fract() == 0.0 && r.abs() <= MAX_EXACT_F64_INT as f64 {
                Some(*r as i64)
            } else {
                None
            }
        }
        Value::Numeric(d) => {
            if d.fract().is_zero() {
                d.to_i64()
            } else {
                None
            }
        }
        Value::Text(s) if mode == CastMode::Conversion => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn to_real(value: &Value, mode: CastMode) -> Option<f64> {
    match value {
        Value::SmallInt(i) => Some(f64::from(*i)),
        Value::Integer(i) => {
            if i.unsigned_abs() <= MAX_EXACT_F64_INT.unsigned_abs() {
                Some(*i as f64)
            } else {
                None
            }
        }
        Value::Real(r) => Some(*r),
        Value::Numeric(d) => {
            let r = d.to_f64()?;
            // Round trip must give the same decimal back
            (Decimal::from_f64(r)? == *d).then_some(r)
        }
        Value::Text(s) if mode == CastMode::Conversion => {
            s.trim().parse::<f64>().ok().filter(|r| r.is_finite())
        }
        _ => None,
    }
}

fn to_decimal(value: &Value, mode: CastMode) -> Option<Decimal> {
    match value {
        Value::SmallInt(_) | Value::Integer(_) | Value::Numeric(_) => value.to_decimal(),
        Value::Real(r) => {
            let d = Decimal::from_f64(*r)?;
            (d.to_f64()? == *r).then_some(d)
        }
        Value::Text(s) if mode == CastMode::Conversion => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn to_text(value: &Value, mode: CastMode) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        other if mode == CastMode::Conversion => Some(other.to_string()),
        _ => None,
    }
}

/// Place `d` into DECIMAL(precision, scale) without rounding
fn fit_decimal(d: Decimal, precision: u8, scale: u8) -> Option<Decimal> {
    let normalized = d.normalize();
    if normalized.scale() > u32::from(scale) {
        return None;
    }

    let integer_digits = u32::from(precision.saturating_sub(scale));
    if integer_digits <= 28 {
        let limit = Decimal::from_i128_with_scale(10_i128.pow(integer_digits), 0);
        if normalized.trunc().abs() >= limit {
            return None;
        }
    }

    let mut fitted = normalized;
    fitted.rescale(u32::from(scale));
    (fitted == normalized).then_some(fitted)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "1" => Some(true),
        "false" | "f" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::default()))
        })
        .filter(|t| t.nanosecond() == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decimal(s: &str) -> Value {
        Value::Numeric(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_text_to_decimal_requires_numeric_text() {
        let target = DataType::Numeric { precision: 10, scale: 0 };
        assert_eq!(
            convert(&Value::Text("42".to_string()), &target, CastMode::Conversion),
            Some(decimal("42"))
        );
        assert_eq!(convert(&Value::Text("UK".to_string()), &target, CastMode::Conversion), None);
    }

    #[test]
    fn test_text_is_not_implicitly_numeric() {
        let target = DataType::Numeric { precision: 10, scale: 0 };
        assert_eq!(convert(&Value::Text("42".to_string()), &target, CastMode::Assignment), None);
    }

    #[test]
    fn test_decimal_precision_loss_is_rejected() {
        let target = DataType::Numeric { precision: 10, scale: 1 };
        assert_eq!(convert(&decimal("1.25"), &target, CastMode::Conversion), None);
        assert_eq!(convert(&decimal("1.50"), &target, CastMode::Conversion), Some(decimal("1.5")));
    }

    #[test]
    fn test_decimal_integer_digits_overflow() {
        let target = DataType::Numeric { precision: 3, scale: 1 };
        assert_eq!(convert(&Value::Integer(99), &target, CastMode::Assignment), Some(decimal("99.0")));
        assert_eq!(convert(&Value::Integer(100), &target, CastMode::Assignment), None);
    }

    #[test]
    fn test_integer_narrowing() {
        assert_eq!(
            convert(&Value::Integer(12), &DataType::SmallInt, CastMode::Assignment),
            Some(Value::SmallInt(12))
        );
        assert_eq!(convert(&Value::Integer(70_000), &DataType::SmallInt, CastMode::Assignment), None);
        assert_eq!(convert(&Value::Real(2.5), &DataType::Integer, CastMode::Assignment), None);
    }

    #[test]
    fn test_varchar_length() {
        let target = DataType::Varchar { max_length: 2 };
        assert!(convert(&Value::Text("UK".to_string()), &target, CastMode::Assignment).is_some());
        assert!(convert(&Value::Text("USA".to_string()), &target, CastMode::Assignment).is_none());
    }

    #[test]
    fn test_null_converts_to_anything() {
        assert_eq!(convert(&Value::Null, &DataType::Date, CastMode::Assignment), Some(Value::Null));
    }

    #[test]
    fn test_convert_for_column_names_the_column() {
        let err = convert_for_column(
            &Value::Text("UK".to_string()),
            &DataType::Integer,
            CastMode::Conversion,
            "country_code",
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::TypeConversionError { ref column, .. } if column == "country_code"));
    }
}
