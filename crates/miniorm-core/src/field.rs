//! Column descriptors.

use crate::types::SqlType;
use crate::value::Value;

/// Foreign-key target of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
    /// Rows holding this key are deleted together with the referenced row.
    pub on_delete_cascade: bool,
}

/// A scalar column declared on an entity class.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column (and attribute) name
    pub name: String,
    /// SQL type for this column
    pub sql_type: SqlType,
    /// Whether this column accepts NULL
    pub nullable: bool,
    /// Whether this is the primary key
    pub primary_key: bool,
    /// Whether this column has a unique constraint
    pub unique: bool,
    /// Value written on insert when the entity leaves the column unset
    pub default: Option<Value>,
    /// Foreign key reference, set for relationship-owned columns
    pub foreign_key: Option<ForeignKeyRef>,
}

impl ColumnDef {
    /// Create a nullable, non-key column.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
            foreign_key: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Integer)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Text)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Real)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Boolean)
    }

    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Blob)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, SqlType::Json)
    }

    /// Mark as primary key. Primary keys are never nullable.
    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        if value {
            self.nullable = false;
        }
        self
    }

    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Set the value used on insert when the attribute is unset.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Reference `table.column`.
    pub fn foreign_key(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKeyRef {
            table: table.into(),
            column: column.into(),
            on_delete_cascade: false,
        });
        self
    }

    /// Value to write for this column on insert, or `None` to leave it out
    /// of the statement.
    pub fn insert_value(&self, current: Option<&Value>) -> Option<Value> {
        match current {
            Some(v) if !v.is_null() => Some(v.clone()),
            _ if self.primary_key => None,
            _ => match &self.default {
                Some(default) => Some(default.clone()),
                None if self.nullable => Some(Value::Null),
                None => None,
            },
        }
    }
}
