//! SQL column types.

use crate::value::Value;

/// Column types understood by the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    BigInt,
    Real,
    Boolean,
    Text,
    Blob,
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub const fn sql_name(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Json => "JSON",
        }
    }

    /// Check if this type is an integer type.
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }

    /// Check whether `value` can be stored in a column of this type.
    ///
    /// NULL is accepted by every type; nullability is checked separately.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (SqlType::Integer | SqlType::BigInt, Value::Int(_) | Value::BigInt(_)) => true,
            (SqlType::Real, Value::Double(_) | Value::Int(_) | Value::BigInt(_)) => true,
            (SqlType::Boolean, Value::Bool(_) | Value::Int(_) | Value::BigInt(_)) => true,
            (SqlType::Text, Value::Text(_)) => true,
            (SqlType::Blob, Value::Bytes(_)) => true,
            (SqlType::Json, _) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts() {
        assert!(SqlType::Integer.accepts(&Value::BigInt(1)));
        assert!(SqlType::Real.accepts(&Value::Int(1)));
        assert!(SqlType::Text.accepts(&Value::Null));
        assert!(!SqlType::Text.accepts(&Value::Int(1)));
        assert!(!SqlType::Integer.accepts(&Value::Text("1".into())));
        assert_eq!(SqlType::Boolean.sql_name(), "BOOLEAN");
    }
}
