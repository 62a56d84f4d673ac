//! Per-class mapping metadata.

use crate::field::ColumnDef;
use crate::inheritance::InheritanceStrategy;
use crate::registry::ClassId;
use crate::relationship::RelationshipInfo;

/// Resolved metadata for one entity class.
///
/// Built once by [`RegistryBuilder::finalize`](crate::RegistryBuilder::finalize)
/// and immutable afterwards; every session shares the same mappers.
#[derive(Debug, Clone)]
pub struct Mapper {
    pub(crate) id: ClassId,
    pub(crate) name: String,
    pub(crate) table_name: String,
    pub(crate) strategy: InheritanceStrategy,
    pub(crate) parent: Option<ClassId>,
    pub(crate) children: Vec<ClassId>,
    pub(crate) root: ClassId,
    pub(crate) columns: Vec<ColumnDef>,
    pub(crate) local_columns: Vec<ColumnDef>,
    pub(crate) primary_key: String,
    pub(crate) key_column: String,
    pub(crate) relationships: Vec<RelationshipInfo>,
    pub(crate) discriminator_column: Option<String>,
    pub(crate) discriminator_value: Option<String>,
    pub(crate) discriminator_map: Vec<(String, ClassId)>,
    pub(crate) is_abstract: bool,
}

impl Mapper {
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// The declared class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Physical table holding this class's rows (the root's table for SINGLE).
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn strategy(&self) -> InheritanceStrategy {
        self.strategy
    }

    pub fn parent(&self) -> Option<ClassId> {
        self.parent
    }

    /// Direct subclasses in declaration order.
    pub fn children(&self) -> &[ClassId] {
        &self.children
    }

    pub fn root(&self) -> ClassId {
        self.root
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Every attribute column of the class, inherited ones included.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Columns physically stored in this class's own table.
    pub fn local_columns(&self) -> &[ColumnDef] {
        &self.local_columns
    }

    pub fn has_local_column(&self, name: &str) -> bool {
        self.local_columns.iter().any(|c| c.name == name)
    }

    /// Name of the primary-key attribute.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Key column of this class's own table. Equal to the primary key
    /// except for CLASS subclasses that link to their parent under another name.
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn relationships(&self) -> &[RelationshipInfo] {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipInfo> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Discriminator column (SINGLE hierarchies only).
    pub fn discriminator_column(&self) -> Option<&str> {
        self.discriminator_column.as_deref()
    }

    /// Tag stored in the discriminator column for this class.
    pub fn discriminator_value(&self) -> Option<&str> {
        self.discriminator_value.as_deref()
    }

    /// `tag -> class` for the whole hierarchy. Only populated on SINGLE roots.
    pub fn discriminator_map(&self) -> &[(String, ClassId)] {
        &self.discriminator_map
    }

    /// Abstract CONCRETE classes have no rows of their own.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Class under which instances are keyed in an identity map.
    ///
    /// SINGLE and CLASS hierarchies share one key space (the root's table
    /// assigns the keys); CONCRETE tables each have their own.
    pub fn identity_class(&self) -> ClassId {
        match self.strategy {
            InheritanceStrategy::Concrete => self.id,
            InheritanceStrategy::Single | InheritanceStrategy::Class => self.root,
        }
    }

    /// Owning to-one relationships, i.e. the ones this class's rows depend on.
    pub fn dependencies(&self) -> impl Iterator<Item = &RelationshipInfo> {
        self.relationships.iter().filter(|r| r.is_owning_to_one())
    }

    /// Relationship of a CLASS subclass that links its table to the parent's.
    pub fn parent_link(&self) -> Option<&RelationshipInfo> {
        if self.strategy != InheritanceStrategy::Class {
            return None;
        }
        let parent = self.parent?;
        self.relationships.iter().find(|r| {
            r.is_owning_to_one()
                && r.target == parent
                && r.foreign_key.as_deref() == Some(self.key_column.as_str())
        })
    }
}
