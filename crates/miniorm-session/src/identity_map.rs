//! Identity Map pattern for tracking unique object instances per primary key.
//!
//! The Identity Map ensures that each database row corresponds to exactly one
//! object instance within a session:
//!
//! - **Uniqueness**: the same key always yields the same [`Entity`] handle
//! - **Consistency**: changes made through one handle are visible everywhere
//!
//! Keys are `(identity class, primary key)`. SINGLE and CLASS hierarchies
//! key every member under the root class, since the root table assigns the
//! keys; CONCRETE classes key under themselves (see
//! [`Mapper::identity_class`](miniorm_core::Mapper::identity_class)).
//!
//! Primary keys are hashed with [`Value::hash_key`] and verified with
//! [`Value::same_key`], so an `Int(1)` supplied by a caller finds the row an
//! engine reported as `BigInt(1)`.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use miniorm_core::{ClassId, Value};

use crate::entity::Entity;

/// Hash a primary key value for use in an [`ObjectKey`].
fn hash_pk(pk: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    pk.hash_key(&mut hasher);
    hasher.finish()
}

/// Unique key for an entity in the identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    class: ClassId,
    pk_hash: u64,
}

impl ObjectKey {
    pub fn new(class: ClassId, pk: &Value) -> Self {
        Self {
            class,
            pk_hash: hash_pk(pk),
        }
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn pk_hash(&self) -> u64 {
        self.pk_hash
    }
}

struct Slot {
    pk: Value,
    entity: Entity,
    seq: u64,
}

/// Per-session registry of live instances.
#[derive(Default)]
pub struct IdentityMap {
    /// Hash collisions share a bucket and are told apart by `same_key`.
    entries: HashMap<ObjectKey, Vec<Slot>>,
    next_seq: u64,
    len: usize,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instance registered for `(class, pk)`.
    pub fn get(&self, class: ClassId, pk: &Value) -> Option<Entity> {
        self.entries
            .get(&ObjectKey::new(class, pk))?
            .iter()
            .find(|slot| slot.pk.same_key(pk))
            .map(|slot| slot.entity.clone())
    }

    pub fn contains(&self, class: ClassId, pk: &Value) -> bool {
        self.get(class, pk).is_some()
    }

    /// Register `entity` under `(class, pk)`.
    ///
    /// If another instance already holds the key it is kept and returned as
    /// `Err`; registering the same instance twice is a no-op.
    pub fn insert(&mut self, class: ClassId, pk: &Value, entity: &Entity) -> Result<(), Entity> {
        let bucket = self.entries.entry(ObjectKey::new(class, pk)).or_default();
        if let Some(slot) = bucket.iter().find(|slot| slot.pk.same_key(pk)) {
            if slot.entity.ptr_eq(entity) {
                return Ok(());
            }
            return Err(slot.entity.clone());
        }

        tracing::trace!(pk = %pk, class = class.index(), "Registering instance in identity map");
        bucket.push(Slot {
            pk: pk.clone(),
            entity: entity.clone(),
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.len += 1;
        Ok(())
    }

    /// Remove the entry for `(class, pk)`, returning its instance.
    pub fn remove(&mut self, class: ClassId, pk: &Value) -> Option<Entity> {
        let key = ObjectKey::new(class, pk);
        let bucket = self.entries.get_mut(&key)?;
        let index = bucket.iter().position(|slot| slot.pk.same_key(pk))?;
        let slot = bucket.swap_remove(index);
        if bucket.is_empty() {
            self.entries.remove(&key);
        }
        self.len -= 1;
        Some(slot.entity)
    }

    /// Remove `entity` wherever it is registered.
    pub fn remove_entity(&mut self, entity: &Entity) -> bool {
        let found = self.entries.iter().find_map(|(key, bucket)| {
            bucket
                .iter()
                .position(|slot| slot.entity.ptr_eq(entity))
                .map(|index| (*key, index))
        });
        let Some((key, index)) = found else {
            return false;
        };
        if let Some(bucket) = self.entries.get_mut(&key) {
            bucket.swap_remove(index);
            if bucket.is_empty() {
                self.entries.remove(&key);
            }
        }
        self.len -= 1;
        true
    }

    pub fn contains_entity(&self, entity: &Entity) -> bool {
        self.entries
            .values()
            .flatten()
            .any(|slot| slot.entity.ptr_eq(entity))
    }

    /// Every registered instance, in registration order.
    pub fn entities(&self) -> Vec<Entity> {
        let mut slots: Vec<&Slot> = self.entries.values().flatten().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.entity.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMap").field("len", &self.len).finish()
    }
}
