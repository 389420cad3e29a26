//! Value coercion toward a destination column's declared type.

use crate::error::TransferError;
use crate::schema::TableColumn;
use crate::types::{DeclaredType, RowValues};

/// Convert `value` to the family `target`, or `None` if it cannot be represented.
///
/// Empty or whitespace-only text becomes NULL for every non-text target.
#[must_use]
pub fn coerce_value(value: &RowValues, target: DeclaredType) -> Option<RowValues> {
    if let RowValues::Text(s) = value {
        if target != DeclaredType::Text && s.trim().is_empty() {
            return Some(RowValues::Null);
        }
    }
    if value.is_null() {
        return Some(RowValues::Null);
    }
    match target {
        DeclaredType::Integer => to_integer(value).map(RowValues::Int),
        DeclaredType::Real => to_real(value).map(RowValues::Float),
        DeclaredType::Boolean => to_boolean(value).map(RowValues::Bool),
        DeclaredType::Timestamp => value.as_timestamp().map(RowValues::Timestamp),
        DeclaredType::Text => Some(match value {
            RowValues::Text(s) => RowValues::Text(s.clone()),
            other => RowValues::Text(other.to_string()),
        }),
        DeclaredType::Blob => match value {
            RowValues::Blob(b) => Some(RowValues::Blob(b.clone())),
            RowValues::Text(s) => Some(RowValues::Blob(s.as_bytes().to_vec())),
            _ => None,
        },
    }
}

fn to_integer(value: &RowValues) -> Option<i64> {
    match value {
        RowValues::Int(i) => Some(*i),
        RowValues::Bool(b) => Some(i64::from(*b)),
        #[allow(clippy::cast_possible_truncation)]
        RowValues::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(*f as i64),
        RowValues::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn to_real(value: &RowValues) -> Option<f64> {
    match value {
        RowValues::Float(f) => Some(*f),
        #[allow(clippy::cast_precision_loss)]
        RowValues::Int(i) => Some(*i as f64),
        RowValues::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn to_boolean(value: &RowValues) -> Option<bool> {
    match value {
        RowValues::Bool(b) => Some(*b),
        RowValues::Int(_) => value.as_bool().copied(),
        RowValues::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Coerce one cell of data row `row` (1-based) into `column`.
pub(crate) fn coerce_cell(
    value: RowValues,
    column: &TableColumn,
    row: usize,
) -> Result<RowValues, TransferError> {
    let failure = |value: &RowValues| TransferError::TypeCoercion {
        row,
        column: column.name.clone(),
        value: if value.is_null() {
            "NULL".to_string()
        } else {
            value.to_string()
        },
        target: column.declared,
    };
    let coerced = coerce_value(&value, column.declared).ok_or_else(|| failure(&value))?;
    if coerced.is_null() && !column.nullable {
        return Err(failure(&value));
    }
    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_targets() {
        let t = DeclaredType::Integer;
        assert_eq!(coerce_value(&RowValues::Text(" 5 ".into()), t), Some(RowValues::Int(5)));
        assert_eq!(coerce_value(&RowValues::Float(3.0), t), Some(RowValues::Int(3)));
        assert_eq!(coerce_value(&RowValues::Float(3.5), t), None);
        assert_eq!(coerce_value(&RowValues::Bool(true), t), Some(RowValues::Int(1)));
        assert_eq!(coerce_value(&RowValues::Text("abc".into()), t), None);
        assert_eq!(coerce_value(&RowValues::Text(String::new()), t), Some(RowValues::Null));
    }

    #[test]
    fn boolean_and_timestamp_targets() {
        assert_eq!(
            coerce_value(&RowValues::Text("YES".into()), DeclaredType::Boolean),
            Some(RowValues::Bool(true))
        );
        assert_eq!(
            coerce_value(&RowValues::Int(2), DeclaredType::Boolean),
            None
        );
        let ts = coerce_value(&RowValues::Text("2024-01-02".into()), DeclaredType::Timestamp);
        assert!(matches!(ts, Some(RowValues::Timestamp(_))));
        assert_eq!(
            coerce_value(&RowValues::Text("soon".into()), DeclaredType::Timestamp),
            None
        );
    }

    #[test]
    fn text_targets_keep_empty_strings() {
        assert_eq!(
            coerce_value(&RowValues::Text(String::new()), DeclaredType::Text),
            Some(RowValues::Text(String::new()))
        );
        assert_eq!(
            coerce_value(&RowValues::Int(7), DeclaredType::Text),
            Some(RowValues::Text("7".into()))
        );
    }

    #[test]
    fn null_into_not_null_column_is_rejected() {
        let column = TableColumn::new("id", "INTEGER", false);
        let err = coerce_cell(RowValues::Null, &column, 4).unwrap_err();
        match err {
            TransferError::TypeCoercion { row, column, value, target } => {
                assert_eq!(row, 4);
                assert_eq!(column, "id");
                assert_eq!(value, "NULL");
                assert_eq!(target, DeclaredType::Integer);
            }
            other => panic!("unexpected error: {other}"),
        }
        let err = coerce_cell(RowValues::Text("abc".into()), &column, 2).unwrap_err();
        assert!(matches!(err, TransferError::TypeCoercion { ref value, .. } if value == "abc"));
    }
}
