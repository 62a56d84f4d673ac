//! Change tracking and dirty detection for the session.
//!
//! This module provides snapshot-based change tracking to detect when
//! instances have been modified since they were loaded or last flushed.
//! A snapshot holds the column values plus, for every loaded many-to-many
//! collection, the sorted primary keys of its members. Nothing hooks into
//! attribute writes; dirtiness is always a diff against the snapshot.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use miniorm_core::Value;

use crate::entity::{Entity, Related};

/// Column values and many-to-many member keys as of the last load or flush.
#[derive(Debug, Clone)]
pub struct ObjectSnapshot {
    values: BTreeMap<String, Value>,
    /// Sorted member keys per many-to-many relationship. Absent when the
    /// collection was not loaded at snapshot time.
    collections: BTreeMap<String, Vec<Value>>,
}

impl ObjectSnapshot {
    fn capture(entity: &Entity) -> Self {
        let mapper = entity.mapper();
        let mut collections = BTreeMap::new();
        for rel in mapper.relationships().iter().filter(|r| r.is_many_to_many()) {
            if let Some(related) = entity.related(&rel.name) {
                collections.insert(rel.name.clone(), member_keys(&related));
            }
        }
        Self {
            values: entity.values(),
            collections,
        }
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Sorted member keys of a many-to-many collection, if recorded.
    pub fn collection(&self, relationship: &str) -> Option<&[Value]> {
        self.collections.get(relationship).map(Vec::as_slice)
    }
}

/// Association rows to add and remove for one many-to-many collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionChange {
    pub relationship: String,
    pub added: Vec<Value>,
    pub removed: Vec<Value>,
    /// The stored links are unknown; remove all of them before adding.
    pub replace: bool,
}

impl CollectionChange {
    pub fn is_empty(&self) -> bool {
        !self.replace && self.added.is_empty() && self.removed.is_empty()
    }
}

/// Sorted, de-duplicated primary keys of the members of `related`.
pub(crate) fn member_keys(related: &Related) -> Vec<Value> {
    let mut keys: Vec<Value> = related.as_many().iter().filter_map(Entity::pk).collect();
    keys.sort_by(Value::total_cmp);
    keys.dedup_by(|a, b| a.same_key(b));
    keys
}

/// Keys in `left` that are not in `right`. Both must be sorted.
fn difference(left: &[Value], right: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    let mut j = 0;
    for value in left {
        while j < right.len() && right[j].total_cmp(value) == Ordering::Less {
            j += 1;
        }
        if j < right.len() && right[j].same_key(value) {
            continue;
        }
        out.push(value.clone());
    }
    out
}

/// Tracks snapshots of persistent instances.
#[derive(Default)]
pub struct ChangeTracker {
    /// Keyed by instance address; the stored handle keeps the address live.
    snapshots: HashMap<usize, (Entity, ObjectSnapshot)>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take (or retake) the snapshot of `entity`.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn snapshot(&mut self, entity: &Entity) {
        let snapshot = ObjectSnapshot::capture(entity);
        tracing::trace!(
            entity = %entity.describe(),
            columns = snapshot.values.len(),
            collections = snapshot.collections.len(),
            "Taking object snapshot"
        );
        self.snapshots
            .insert(entity.addr(), (entity.clone(), snapshot));
    }

    /// Record the stored members of a freshly loaded collection.
    pub fn record_collection(&mut self, entity: &Entity, relationship: &str, related: &Related) {
        if let Some((_, snapshot)) = self.snapshots.get_mut(&entity.addr()) {
            snapshot
                .collections
                .insert(relationship.to_string(), member_keys(related));
        }
    }

    pub fn get(&self, entity: &Entity) -> Option<&ObjectSnapshot> {
        self.snapshots.get(&entity.addr()).map(|(_, s)| s)
    }

    pub fn has_snapshot(&self, entity: &Entity) -> bool {
        self.snapshots.contains_key(&entity.addr())
    }

    /// Columns whose value differs from the snapshot, in declaration
    /// order. `None` when there is no snapshot to compare against.
    pub fn changed_columns(&self, entity: &Entity) -> Option<Vec<(String, Value)>> {
        let snapshot = self.get(entity)?;
        let mapper = entity.mapper();
        let current = entity.values();
        let changed = mapper
            .columns()
            .iter()
            .filter_map(|col| {
                let now = current.get(&col.name).unwrap_or(&Value::Null);
                let before = snapshot.values.get(&col.name).unwrap_or(&Value::Null);
                (!now.same_key(before)).then(|| (col.name.clone(), now.clone()))
            })
            .collect();
        Some(changed)
    }

    /// Association changes of every loaded many-to-many collection.
    ///
    /// `inserted` marks an instance whose row was just created, so it has
    /// no stored links yet.
    pub fn collection_changes(&self, entity: &Entity, inserted: bool) -> Vec<CollectionChange> {
        let mapper = entity.mapper();
        let snapshot = self.get(entity);
        let mut changes = Vec::new();
        for rel in mapper.relationships().iter().filter(|r| r.is_many_to_many()) {
            let Some(related) = entity.related(&rel.name) else {
                continue;
            };
            let current = member_keys(&related);
            let baseline = snapshot.and_then(|s| s.collection(&rel.name));
            let change = match baseline {
                Some(before) => CollectionChange {
                    relationship: rel.name.clone(),
                    added: difference(&current, before),
                    removed: difference(before, &current),
                    replace: false,
                },
                None => CollectionChange {
                    relationship: rel.name.clone(),
                    added: current,
                    removed: Vec::new(),
                    replace: !inserted,
                },
            };
            if !change.is_empty() {
                changes.push(change);
            }
        }
        changes
    }

    /// Has `entity` changed since its snapshot?
    ///
    /// Instances without a snapshot are never reported as modified; they
    /// are only written when explicitly updated.
    pub fn is_modified(&self, entity: &Entity) -> bool {
        if !self.has_snapshot(entity) {
            return false;
        }
        self.changed_columns(entity)
            .is_some_and(|changed| !changed.is_empty())
            || !self.collection_changes(entity, false).is_empty()
    }

    pub fn remove(&mut self, entity: &Entity) {
        self.snapshots.remove(&entity.addr());
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("snapshots", &self.snapshots.len())
            .finish()
    }
}
