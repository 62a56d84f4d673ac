//! SQL generation for miniorm.
//!
//! `miniorm-query` is the **statement construction layer**. It turns
//! resolved `Mapper` metadata plus caller-supplied filters into SQL text and
//! positional parameters, and never talks to an engine itself.
//!
//! # Role In The Architecture
//!
//! - **Expression tree**: `Expr` builds WHERE clauses; every literal is bound.
//! - **DML builders**: `InsertBuilder`, `UpdateBuilder`, `DeleteBuilder` and
//!   `AssociationStatements` produce one `Statement` each.
//! - **Select planning**: `Select` produces the strategy-specific SELECT and
//!   the `HydrationLayout` the session uses to rebuild entities.
//!
//! All identifiers pass the allow-list in `miniorm_core::identifiers` before
//! they are quoted.

pub mod builder;
pub mod clause;
pub mod expr;
pub mod select;

pub use builder::{AssociationStatements, DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use clause::{OrderBy, OrderDirection};
pub use expr::{BinaryOp, ColumnResolver, Expr};
pub use select::{HydrationLayout, Select, SelectPlan, TYPE_TAG_COLUMN};
