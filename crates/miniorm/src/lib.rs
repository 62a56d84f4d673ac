//! miniorm - object-relational mapping with a unit-of-work session.
//!
//! miniorm maps class hierarchies to relational tables and keeps in-memory
//! instances in step with a backing SQL store:
//!
//! - Schema declared at runtime and resolved once into a `SchemaRegistry`
//! - SINGLE, CLASS (joined) and CONCRETE inheritance with polymorphic queries
//! - Identity map, snapshot-based dirty checking and dependency-ordered flush
//! - Parameterized SQL with an allow-list for every identifier
//!
//! The database itself stays outside: anything implementing [`Engine`] can
//! back a [`Session`].
//!
//! # Quick Start
//!
//! ```ignore
//! use miniorm::prelude::*;
//!
//! let mut builder = SchemaRegistry::builder();
//! builder.register(
//!     EntityClass::new("Owner")
//!         .column(ColumnDef::integer("id").primary_key(true))
//!         .column(ColumnDef::text("name")),
//! )?;
//! builder.register(
//!     EntityClass::new("Pet")
//!         .column(ColumnDef::integer("id").primary_key(true))
//!         .column(ColumnDef::text("name"))
//!         .relationship("owner", Relationship::many_to_one("Owner").backref("pets")),
//! )?;
//! let registry = builder.finalize()?;
//!
//! let mut session = Session::new(engine, registry);
//! let owner = session.new_entity("Owner")?;
//! owner.set("name", "Ann")?;
//! let pet = session.new_entity("Pet")?;
//! pet.set("name", "Rex")?;
//! pet.set_related("owner", Some(&owner))?;
//! session.add(&pet)?;
//! session.commit()?;
//!
//! let rex = session
//!     .query("Pet")?
//!     .filter(Expr::col("name").eq("Rex"))
//!     .first()?;
//! ```

pub use miniorm_core::{
    AssociationTable,
    ClassId,
    ColumnDef,
    // Errors
    ConfigError,
    CycleError,
    // Engine contract
    Engine,
    // Schema declaration
    EntityClass,
    Error,
    FlushError,
    ForeignKeyRef,
    IdentifierError,
    InheritanceStrategy,
    Mapper,
    QueryError,
    QueryErrorKind,
    RegistryBuilder,
    Relationship,
    RelationshipInfo,
    RelationshipKind,
    Result,
    Row,
    SchemaRegistry,
    SqlType,
    Statement,
    // Values
    Value,
    is_safe_identifier,
    quote_ident,
};

pub use miniorm_query::{
    AssociationStatements, BinaryOp, DeleteBuilder, Expr, HydrationLayout, InsertBuilder, OrderBy,
    OrderDirection, Select, SelectPlan, UpdateBuilder,
};

pub use miniorm_session::{
    ChangeTracker, CollectionChange, DependencyGraph, Entity, FlushStats, IdentityMap, ObjectKey,
    ObjectSnapshot, ObjectState, PendingCounts, PendingOp, Query, Related, Session,
    SessionConfig, UnitOfWork,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use miniorm::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ColumnDef, Engine, Entity, EntityClass, Error, Expr, ObjectState, OrderDirection, Related,
        Relationship, Result, Row, SchemaRegistry, Session, SessionConfig, Value,
    };
}
