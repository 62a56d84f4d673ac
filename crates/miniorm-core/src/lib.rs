//! Core types for miniorm.
//!
//! This crate holds everything that does not depend on a live session:
//!
//! - `Value` and `Row` for data crossing the engine boundary
//! - `Engine`, the trait a database driver implements
//! - `EntityClass` declarations and the resolved `SchemaRegistry` / `Mapper`
//! - inheritance strategies and the table writes they imply
//! - identifier validation and quoting

pub mod engine;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod inheritance;
pub mod mapper;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod types;
pub mod value;

pub use engine::{Engine, Statement};
pub use error::{
    ConfigError, CycleError, Error, FlushError, IdentifierError, QueryError, QueryErrorKind,
    Result,
};
pub use field::{ColumnDef, ForeignKeyRef};
pub use identifiers::{column_alias, is_safe_identifier, quote_ident, quote_qualified};
pub use inheritance::{InheritanceStrategy, TableWrite, plan_delete, plan_insert, plan_update};
pub use mapper::Mapper;
pub use registry::{ClassId, EntityClass, RegistryBuilder, SchemaRegistry};
pub use relationship::{AssociationTable, Relationship, RelationshipInfo, RelationshipKind};
pub use row::{ColumnInfo, Row};
pub use types::SqlType;
pub use value::Value;
