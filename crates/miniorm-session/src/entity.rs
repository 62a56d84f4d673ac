//! Entity instances and their lifecycle state.
//!
//! An [`Entity`] is a shared handle to one mapped object. Clones of the
//! handle refer to the same instance, so a change made through one is
//! visible through all of them; this is what lets the identity map hand out
//! "the" instance for a row.
//!
//! Column writes go through [`Entity::set`], which enforces primary-key
//! immutability. Relationship values are cached on the instance and only
//! loaded from the store by [`Session::load`](crate::Session::load).

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use miniorm_core::{ClassId, Error, Mapper, RelationshipInfo, Result, Value};

/// State of an entity relative to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectState {
    /// Never persisted, not tracked.
    Transient,
    /// Queued for INSERT on the next flush.
    Pending,
    /// Has a primary key, tracked, snapshot valid.
    Persistent,
    /// Tracked, but values may be stale; reloaded on next read.
    Expired,
    /// Queued for or removed by DELETE.
    Deleted,
    /// No longer bound to a session.
    Detached,
}

impl ObjectState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Transient => "TRANSIENT",
            ObjectState::Pending => "PENDING",
            ObjectState::Persistent => "PERSISTENT",
            ObjectState::Expired => "EXPIRED",
            ObjectState::Deleted => "DELETED",
            ObjectState::Detached => "DETACHED",
        }
    }

    /// Persistent or expired: the instance mirrors a stored row.
    pub const fn is_persistent(&self) -> bool {
        matches!(self, ObjectState::Persistent | ObjectState::Expired)
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker owned by a session. Entities hold it weakly.
#[derive(Debug)]
pub(crate) struct SessionToken {
    pub(crate) id: u64,
}

impl SessionToken {
    pub(crate) fn new() -> Rc<Self> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Rc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        })
    }
}

/// A loaded relationship value.
#[derive(Debug, Clone)]
pub enum Related {
    /// Many-to-one or one-to-one.
    One(Option<Entity>),
    /// One-to-many or many-to-many.
    Many(Vec<Entity>),
}

impl Related {
    pub(crate) fn empty(rel: &RelationshipInfo) -> Self {
        if rel.is_collection() {
            Related::Many(Vec::new())
        } else {
            Related::One(None)
        }
    }

    /// The referenced entity of a to-one value.
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Related::One(one) => one.as_ref(),
            Related::Many(_) => None,
        }
    }

    /// Members of a collection value. A to-one value yields zero or one.
    pub fn as_many(&self) -> &[Entity] {
        match self {
            Related::One(Some(one)) => std::slice::from_ref(one),
            Related::One(None) => &[],
            Related::Many(many) => many,
        }
    }

    pub fn into_one(self) -> Option<Entity> {
        match self {
            Related::One(one) => one,
            Related::Many(many) => many.into_iter().next(),
        }
    }

    pub fn into_many(self) -> Vec<Entity> {
        match self {
            Related::One(one) => one.into_iter().collect(),
            Related::Many(many) => many,
        }
    }
}

pub(crate) struct EntityData {
    pub(crate) mapper: Arc<Mapper>,
    pub(crate) values: BTreeMap<String, Value>,
    pub(crate) relations: HashMap<String, Related>,
    pub(crate) state: ObjectState,
    pub(crate) session: Option<Weak<SessionToken>>,
}

/// Shared handle to a mapped instance.
#[derive(Clone)]
pub struct Entity(Rc<RefCell<EntityData>>);

impl Entity {
    /// Create a TRANSIENT instance of the class described by `mapper`.
    ///
    /// SINGLE-table classes start with their discriminator tag set.
    pub fn new(mapper: Arc<Mapper>) -> Self {
        let mut values = BTreeMap::new();
        if let (Some(column), Some(tag)) = (mapper.discriminator_column(), mapper.discriminator_value()) {
            values.insert(column.to_string(), Value::Text(tag.to_string()));
        }
        Self::from_parts(mapper, values, ObjectState::Transient)
    }

    pub(crate) fn from_parts(
        mapper: Arc<Mapper>,
        values: BTreeMap<String, Value>,
        state: ObjectState,
    ) -> Self {
        Self(Rc::new(RefCell::new(EntityData {
            mapper,
            values,
            relations: HashMap::new(),
            state,
            session: None,
        })))
    }

    /// Do both handles refer to the same instance?
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn state(&self) -> ObjectState {
        self.0.borrow().state
    }

    pub fn class_name(&self) -> String {
        self.0.borrow().mapper.name().to_string()
    }

    pub fn class_id(&self) -> ClassId {
        self.0.borrow().mapper.id()
    }

    pub fn mapper(&self) -> Arc<Mapper> {
        Arc::clone(&self.0.borrow().mapper)
    }

    /// Current value of a column, `None` if it was never set.
    ///
    /// This never touches the store; use
    /// [`Session::read`](crate::Session::read) to reload expired instances.
    pub fn get(&self, column: &str) -> Option<Value> {
        self.0.borrow().values.get(column).cloned()
    }

    /// The primary key, if assigned.
    pub fn pk(&self) -> Option<Value> {
        let data = self.0.borrow();
        data.values
            .get(data.mapper.primary_key())
            .filter(|v| !v.is_null())
            .cloned()
    }

    /// All column values.
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.0.borrow().values.clone()
    }

    /// Assign a column.
    ///
    /// Fails on undeclared columns and on any change to the primary key of
    /// a persisted instance. Assigning a foreign-key column drops the cached
    /// reference of the relationship that owns it.
    ///
    /// Writing to an EXPIRED instance makes it PERSISTENT again without a
    /// reload: columns not assigned keep the values loaded before expiry.
    /// Call `Session::refresh` first to pick up the stored row.
    pub fn set(&self, column: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut data = self.0.borrow_mut();
        if !data.mapper.has_column(column) {
            return Err(Error::UnknownColumn {
                class: data.mapper.name().to_string(),
                column: column.to_string(),
            });
        }

        if column == data.mapper.primary_key() && data.state.is_persistent() {
            let unchanged = data.values.get(column).is_some_and(|v| v.same_key(&value));
            if !unchanged {
                return Err(Error::ImmutablePrimaryKey {
                    class: data.mapper.name().to_string(),
                    column: column.to_string(),
                });
            }
            return Ok(());
        }

        let stale: Vec<String> = data
            .mapper
            .dependencies()
            .filter(|r| r.foreign_key.as_deref() == Some(column))
            .map(|r| r.name.clone())
            .collect();
        for name in stale {
            data.relations.remove(&name);
        }

        if data.state == ObjectState::Expired {
            data.state = ObjectState::Persistent;
        }
        data.values.insert(column.to_string(), value);
        Ok(())
    }

    /// Point a to-one relationship at `target` (or clear it with `None`).
    ///
    /// The foreign-key column follows at the next flush.
    pub fn set_related(&self, relationship: &str, target: Option<&Entity>) -> Result<()> {
        let rel = self.relationship_info(relationship)?;
        if rel.is_collection() {
            return Err(Error::InvalidState(format!(
                "'{}' is a {} relationship; use set_collection",
                rel.name,
                rel.kind.as_str()
            )));
        }
        self.cache_relation(&rel.name, Related::One(target.cloned()));
        Ok(())
    }

    /// Replace the members of a collection relationship.
    pub fn set_collection(&self, relationship: &str, members: Vec<Entity>) -> Result<()> {
        let rel = self.relationship_info(relationship)?;
        if !rel.is_collection() {
            return Err(Error::InvalidState(format!(
                "'{}' is a {} relationship; use set_related",
                rel.name,
                rel.kind.as_str()
            )));
        }
        self.cache_relation(&rel.name, Related::Many(members));
        Ok(())
    }

    /// Append to a collection relationship.
    ///
    /// A stored instance must have the collection loaded first, otherwise
    /// the appended member would replace the stored ones.
    pub fn push_related(&self, relationship: &str, member: &Entity) -> Result<()> {
        let rel = self.relationship_info(relationship)?;
        let mut data = self.0.borrow_mut();
        if !rel.is_collection() {
            return Err(Error::InvalidState(format!(
                "'{}' is a {} relationship; use set_related",
                rel.name,
                rel.kind.as_str()
            )));
        }
        let may_start_empty = matches!(
            data.state,
            ObjectState::Transient | ObjectState::Pending
        );
        match data.relations.get_mut(&rel.name) {
            Some(Related::Many(members)) => {
                if !members.iter().any(|m| m.ptr_eq(member)) {
                    members.push(member.clone());
                }
                Ok(())
            }
            _ if may_start_empty => {
                data.relations
                    .insert(rel.name.clone(), Related::Many(vec![member.clone()]));
                Ok(())
            }
            _ => Err(Error::InvalidState(format!(
                "collection '{}' of {} is not loaded; load it before appending",
                rel.name,
                data.mapper.name()
            ))),
        }
    }

    /// Cached value of a relationship, without loading.
    pub fn related(&self, relationship: &str) -> Option<Related> {
        self.0.borrow().relations.get(relationship).cloned()
    }

    fn relationship_info(&self, relationship: &str) -> Result<RelationshipInfo> {
        let data = self.0.borrow();
        data.mapper
            .relationship(relationship)
            .cloned()
            .ok_or_else(|| Error::UnknownRelationship {
                class: data.mapper.name().to_string(),
                relationship: relationship.to_string(),
            })
    }

    // ==================== Session-side access ====================

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }

    pub(crate) fn set_state(&self, state: ObjectState) {
        self.0.borrow_mut().state = state;
    }

    pub(crate) fn attach(&self, token: &Rc<SessionToken>) {
        self.0.borrow_mut().session = Some(Rc::downgrade(token));
    }

    pub(crate) fn detach(&self) {
        self.0.borrow_mut().session = None;
    }

    /// Bound to the session owning `token`?
    pub(crate) fn belongs_to(&self, token: &Rc<SessionToken>) -> bool {
        self.0
            .borrow()
            .session
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|own| Rc::ptr_eq(&own, token))
    }

    /// Bound to a session other than `token`'s that is still alive?
    pub(crate) fn bound_elsewhere(&self, token: &Rc<SessionToken>) -> bool {
        self.0
            .borrow()
            .session
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|other| !Rc::ptr_eq(&other, token))
    }

    /// Write a column without the checks of [`Entity::set`].
    pub(crate) fn write(&self, column: &str, value: Value) {
        self.0.borrow_mut().values.insert(column.to_string(), value);
    }

    pub(crate) fn merge_values(&self, values: impl IntoIterator<Item = (String, Value)>) {
        self.0.borrow_mut().values.extend(values);
    }

    pub(crate) fn replace_values(&self, values: BTreeMap<String, Value>) {
        self.0.borrow_mut().values = values;
    }

    pub(crate) fn clear_value(&self, column: &str) {
        self.0.borrow_mut().values.remove(column);
    }

    pub(crate) fn cache_relation(&self, name: &str, value: Related) {
        self.0.borrow_mut().relations.insert(name.to_string(), value);
    }

    pub(crate) fn clear_relations(&self) {
        self.0.borrow_mut().relations.clear();
    }

    /// Loaded relationships, cloned so callers can walk them freely.
    pub(crate) fn loaded_relations(&self) -> Vec<(String, Related)> {
        self.0
            .borrow()
            .relations
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Text identifying the instance in logs and cycle errors.
    pub(crate) fn describe(&self) -> String {
        let data = self.0.borrow();
        match data.values.get(data.mapper.primary_key()).filter(|v| !v.is_null()) {
            Some(pk) => format!("{}({})", data.mapper.name(), pk),
            None => format!("{}(new)", data.mapper.name()),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(data) => f
                .debug_struct("Entity")
                .field("class", &data.mapper.name())
                .field("state", &data.state)
                .field("values", &data.values)
                .field("relations", &data.relations.keys().collect::<Vec<_>>())
                .finish(),
            Err(_) => f.write_str("Entity(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miniorm_core::{ColumnDef, EntityClass, Relationship, SchemaRegistry};

    fn registry() -> Arc<SchemaRegistry> {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(
                EntityClass::new("Owner")
                    .column(ColumnDef::integer("id").primary_key(true))
                    .column(ColumnDef::text("name")),
            )
            .unwrap();
        builder
            .register(
                EntityClass::new("Pet")
                    .column(ColumnDef::integer("id").primary_key(true))
                    .column(ColumnDef::text("name"))
                    .relationship("owner", Relationship::many_to_one("Owner").backref("pets")),
            )
            .unwrap();
        builder
            .register(
                EntityClass::new("Shape")
                    .inheritance("single")
                    .column(ColumnDef::integer("id").primary_key(true)),
            )
            .unwrap();
        builder.finalize().unwrap()
    }

    fn new(registry: &SchemaRegistry, class: &str) -> Entity {
        Entity::new(Arc::clone(registry.by_name(class).unwrap()))
    }

    #[test]
    fn test_set_and_get() {
        let registry = registry();
        let pet = new(&registry, "Pet");
        assert_eq!(pet.state(), ObjectState::Transient);
        assert_eq!(pet.get("name"), None);
        pet.set("name", "Rex").unwrap();
        assert_eq!(pet.get("name"), Some(Value::from("Rex")));
        assert!(pet.pk().is_none());

        let err = pet.set("colour", "red").unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { .. }));
    }

    #[test]
    fn test_primary_key_is_immutable_once_persisted() {
        let registry = registry();
        let owner = new(&registry, "Owner");
        owner.set("id", 5).unwrap();
        owner.set("id", 6).unwrap();
        owner.set_state(ObjectState::Persistent);

        owner.set("id", Value::BigInt(6)).unwrap();
        let err = owner.set("id", 7).unwrap_err();
        assert!(matches!(err, Error::ImmutablePrimaryKey { ref column, .. } if column == "id"));
        assert_eq!(owner.pk(), Some(Value::Int(6)));

        owner.set_state(ObjectState::Expired);
        assert!(owner.set("id", 8).is_err());
        owner.set("name", "Ann").unwrap();
        assert_eq!(owner.state(), ObjectState::Persistent);
    }

    #[test]
    fn test_setting_foreign_key_drops_cached_reference() {
        let registry = registry();
        let owner = new(&registry, "Owner");
        let pet = new(&registry, "Pet");
        pet.set_related("owner", Some(&owner)).unwrap();
        assert!(pet.related("owner").unwrap().as_one().unwrap().ptr_eq(&owner));

        pet.set("owner_id", 3).unwrap();
        assert!(pet.related("owner").is_none());
    }

    #[test]
    fn test_relationship_kinds_are_checked() {
        let registry = registry();
        let owner = new(&registry, "Owner");
        let pet = new(&registry, "Pet");
        assert!(owner.set_related("pets", Some(&pet)).is_err());
        assert!(pet.set_collection("owner", vec![owner.clone()]).is_err());
        assert!(matches!(
            pet.set_related("vet", None).unwrap_err(),
            Error::UnknownRelationship { .. }
        ));

        owner.push_related("pets", &pet).unwrap();
        owner.push_related("pets", &pet).unwrap();
        assert_eq!(owner.related("pets").unwrap().as_many().len(), 1);
    }

    #[test]
    fn test_push_requires_loaded_collection_on_stored_instance() {
        let registry = registry();
        let owner = new(&registry, "Owner");
        let pet = new(&registry, "Pet");
        owner.set_state(ObjectState::Persistent);
        assert!(matches!(
            owner.push_related("pets", &pet).unwrap_err(),
            Error::InvalidState(_)
        ));
        owner.cache_relation("pets", Related::Many(Vec::new()));
        owner.push_related("pets", &pet).unwrap();
    }

    #[test]
    fn test_single_table_instance_starts_tagged() {
        let registry = registry();
        let shape = new(&registry, "Shape");
        assert_eq!(shape.get("type"), Some(Value::from("Shape")));
    }

    #[test]
    fn test_session_binding() {
        let registry = registry();
        let pet = new(&registry, "Pet");
        let mine = SessionToken::new();
        let other = SessionToken::new();
        assert_ne!(mine.id, other.id);

        pet.attach(&other);
        assert!(pet.bound_elsewhere(&mine));
        assert!(!pet.belongs_to(&mine));
        drop(other);
        assert!(!pet.bound_elsewhere(&mine));

        pet.attach(&mine);
        assert!(pet.belongs_to(&mine));
        pet.detach();
        assert!(!pet.belongs_to(&mine));
    }

    #[test]
    fn test_clones_share_state() {
        let registry = registry();
        let a = new(&registry, "Owner");
        let b = a.clone();
        b.set("name", "Ann").unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.get("name"), Some(Value::from("Ann")));
        assert_eq!(a.describe(), "Owner(new)");
    }
}
