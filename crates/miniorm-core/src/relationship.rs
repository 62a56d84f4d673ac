//! Relationship descriptors.
//!
//! A [`Relationship`] is what an entity class declares; [`RelationshipInfo`]
//! is the resolved form stored on a [`Mapper`](crate::Mapper) after
//! [`RegistryBuilder::finalize`](crate::RegistryBuilder::finalize) has found
//! the target class, named the foreign-key column or association table, and
//! wired up backrefs.

use crate::registry::ClassId;

/// The type of relationship between two entity classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one: a `Person` has one `Passport`.
    OneToOne,
    /// Many-to-one: many `Pet`s belong to one `Owner`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Owner` has many `Pet`s.
    OneToMany,
    /// Many-to-many: `Student`s have many `Course`s via an association table.
    ManyToMany,
}

impl RelationshipKind {
    /// Does this side hold a single reference (rather than a collection)?
    pub const fn is_to_one(&self) -> bool {
        matches!(self, RelationshipKind::ManyToOne | RelationshipKind::OneToOne)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::OneToOne => "one-to-one",
            RelationshipKind::ManyToOne => "many-to-one",
            RelationshipKind::OneToMany => "one-to-many",
            RelationshipKind::ManyToMany => "many-to-many",
        }
    }
}

/// The association table backing a many-to-many relationship.
///
/// `local_key` references the side that owns the descriptor, `remote_key`
/// the target side. The reverse descriptor holds the same table with the
/// keys swapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTable {
    pub name: String,
    pub local_key: String,
    pub remote_key: String,
}

impl AssociationTable {
    /// Derive the association table for a relationship from `local_table`
    /// to `remote_table`: sorted table names joined with `_`, keys named
    /// `<singular>_id`.
    pub fn between(local_table: &str, remote_table: &str) -> Self {
        let mut tables = [local_table, remote_table];
        tables.sort_unstable();
        let local_key = format!("{}_id", singular(local_table));
        let remote_key = if local_table == remote_table {
            format!("related_{}_id", singular(remote_table))
        } else {
            format!("{}_id", singular(remote_table))
        };
        Self {
            name: tables.join("_"),
            local_key,
            remote_key,
        }
    }

    /// The same table seen from the other side.
    pub fn reversed(&self) -> Self {
        Self {
            name: self.name.clone(),
            local_key: self.remote_key.clone(),
            remote_key: self.local_key.clone(),
        }
    }
}

/// Table name with one trailing `s` removed.
pub fn singular(table: &str) -> &str {
    table.strip_suffix('s').unwrap_or(table)
}

/// A relationship as declared on an entity class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub kind: RelationshipKind,
    /// Target class name or table name.
    pub target: String,
    pub backref: Option<String>,
    pub foreign_key: Option<String>,
    pub association: Option<String>,
    pub cascade_delete: bool,
}

impl Relationship {
    pub fn new(kind: RelationshipKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            backref: None,
            foreign_key: None,
            association: None,
            cascade_delete: false,
        }
    }

    pub fn many_to_one(target: impl Into<String>) -> Self {
        Self::new(RelationshipKind::ManyToOne, target)
    }

    pub fn one_to_one(target: impl Into<String>) -> Self {
        Self::new(RelationshipKind::OneToOne, target)
    }

    pub fn one_to_many(target: impl Into<String>) -> Self {
        Self::new(RelationshipKind::OneToMany, target)
    }

    pub fn many_to_many(target: impl Into<String>) -> Self {
        Self::new(RelationshipKind::ManyToMany, target)
    }

    /// Name of the reverse relationship created on the target.
    pub fn backref(mut self, name: impl Into<String>) -> Self {
        self.backref = Some(name.into());
        self
    }

    /// Explicit foreign-key column name.
    ///
    /// For to-one relationships this column lives on the declaring class;
    /// for one-to-many it names the column on the target.
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Explicit association table name for many-to-many.
    pub fn association(mut self, table: impl Into<String>) -> Self {
        self.association = Some(table.into());
        self
    }

    /// Delete holders of this foreign key when the referenced row is deleted.
    pub fn cascade_delete(mut self, value: bool) -> Self {
        self.cascade_delete = value;
        self
    }
}

/// A fully resolved relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipInfo {
    pub name: String,
    pub kind: RelationshipKind,
    pub target: ClassId,
    /// Class that declared this relationship (it may be inherited).
    pub declared_by: ClassId,
    /// Foreign-key column. On the declaring class for owning to-one
    /// relationships, on the target class otherwise. `None` for many-to-many.
    pub foreign_key: Option<String>,
    pub association: Option<AssociationTable>,
    pub backref: Option<String>,
    pub cascade_delete: bool,
    /// Whether the foreign-key column lives on this side.
    pub owning: bool,
}

impl RelationshipInfo {
    /// Many-to-one or one-to-one holding the foreign key locally.
    pub fn is_owning_to_one(&self) -> bool {
        self.owning && self.kind.is_to_one()
    }

    pub fn is_many_to_many(&self) -> bool {
        self.kind == RelationshipKind::ManyToMany
    }

    /// Does this side hold a collection?
    pub fn is_collection(&self) -> bool {
        !self.kind.is_to_one()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_naming() {
        let assoc = AssociationTable::between("students", "courses");
        assert_eq!(assoc.name, "courses_students");
        assert_eq!(assoc.local_key, "student_id");
        assert_eq!(assoc.remote_key, "course_id");

        let reverse = assoc.reversed();
        assert_eq!(reverse.name, "courses_students");
        assert_eq!(reverse.local_key, "course_id");
        assert_eq!(reverse.remote_key, "student_id");
    }

    #[test]
    fn test_self_referential_association() {
        let assoc = AssociationTable::between("users", "users");
        assert_eq!(assoc.name, "users_users");
        assert_eq!(assoc.local_key, "user_id");
        assert_eq!(assoc.remote_key, "related_user_id");
    }

    #[test]
    fn test_singular() {
        assert_eq!(singular("owners"), "owner");
        assert_eq!(singular("staff"), "staff");
        assert_eq!(singular("classes"), "classe");
    }

    #[test]
    fn test_declaration_builder() {
        let rel = Relationship::many_to_one("Owner")
            .backref("pets")
            .cascade_delete(true);
        assert_eq!(rel.kind, RelationshipKind::ManyToOne);
        assert_eq!(rel.backref.as_deref(), Some("pets"));
        assert!(rel.cascade_delete);
        assert!(rel.kind.is_to_one());
        assert!(!RelationshipKind::ManyToMany.is_to_one());
        assert_eq!(RelationshipKind::OneToMany.as_str(), "one-to-many");
    }
}
