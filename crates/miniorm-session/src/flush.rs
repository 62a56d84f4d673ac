//! Flush operation ordering and statement execution.
//!
//! This module handles writing pending changes to the database in the
//! correct order:
//!
//! - INSERT parent-first, ordered by a [`DependencyGraph`] over the
//!   entities being inserted
//! - UPDATE and DELETE in the order they were queued (cascaded deletes are
//!   queued dependents-first)
//! - association rows last, once every row they reference exists
//!
//! The helpers here run statements for one entity at a time. Session state
//! (identity map, snapshots, lifecycle) is left to the caller.

use std::collections::{HashMap, HashSet, VecDeque};

use miniorm_core::{
    CycleError, Engine, Error, Mapper, RelationshipInfo, RelationshipKind, Result, SchemaRegistry,
    Statement, Value, plan_delete, plan_insert, plan_update,
};
use miniorm_query::{AssociationStatements, DeleteBuilder, InsertBuilder, UpdateBuilder};

use crate::change_tracker::CollectionChange;
use crate::entity::{Entity, Related};

/// Counters reported at the end of a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub links_added: usize,
    pub links_removed: usize,
    pub statements: usize,
}

/// Insert order for a set of new entities.
///
/// Each node is one entity. An edge `parent -> child` exists when the child
/// holds a many-to-one or one-to-one reference to the parent and both are
/// being inserted, since the child's foreign key needs the parent's key.
/// The per-table writes of a CLASS hierarchy are ordered by
/// [`plan_insert`] within a single node.
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: Vec<Entity>,
    dependents: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
}

impl DependencyGraph {
    pub fn new(nodes: Vec<Entity>) -> Self {
        let n = nodes.len();
        Self {
            nodes,
            dependents: vec![Vec::new(); n],
            in_degree: vec![0; n],
        }
    }

    /// Build the graph from the cached references of `inserts`.
    pub fn from_inserts(inserts: Vec<Entity>) -> Self {
        let index: HashMap<usize, usize> = inserts
            .iter()
            .enumerate()
            .map(|(i, e)| (e.addr(), i))
            .collect();
        let mut graph = Self::new(inserts);
        for child in 0..graph.nodes.len() {
            for target in referenced_entities(&graph.nodes[child]) {
                if let Some(&parent) = index.get(&target.addr()) {
                    graph.add_dependency(parent, child);
                }
            }
        }
        graph
    }

    /// `child` must come after `parent`.
    pub fn add_dependency(&mut self, parent: usize, child: usize) {
        self.dependents[parent].push(child);
        self.in_degree[child] += 1;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm. Ties keep the original order.
    pub fn order(self) -> std::result::Result<Vec<Entity>, CycleError> {
        let mut in_degree = self.in_degree;
        let mut ready: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_front() {
            order.push(node);
            for &child in &self.dependents[node] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push_back(child);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let entities = (0..self.nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].describe())
                .collect();
            return Err(CycleError { entities });
        }
        Ok(order.into_iter().map(|i| self.nodes[i].clone()).collect())
    }
}

/// Targets of the loaded foreign-key references of `entity`.
fn referenced_entities(entity: &Entity) -> Vec<Entity> {
    let mapper = entity.mapper();
    entity
        .loaded_relations()
        .into_iter()
        .filter(|(name, _)| is_synced_reference(&mapper, name))
        .filter_map(|(_, related)| related.into_one())
        .collect()
}

/// Owning to-one relationships whose column follows the cached reference.
///
/// The link of a CLASS subclass to its parent table is excluded: its column
/// is the row's own key.
fn is_synced_reference(mapper: &Mapper, name: &str) -> bool {
    let Some(rel) = mapper.relationship(name) else {
        return false;
    };
    rel.is_owning_to_one() && mapper.parent_link().is_none_or(|link| link.name != rel.name)
}

/// Copy the keys of referenced entities into foreign-key columns.
///
/// References to entities without a key yet are left alone; they are
/// synchronised again right before the row is written.
pub(crate) fn sync_foreign_keys(entity: &Entity) {
    let mapper = entity.mapper();
    for (name, related) in entity.loaded_relations() {
        if !is_synced_reference(&mapper, &name) {
            continue;
        }
        let Some(fk) = mapper.relationship(&name).and_then(|r| r.foreign_key.as_deref()) else {
            continue;
        };
        let desired = match related.as_one() {
            Some(target) => match target.pk() {
                Some(pk) => pk,
                None => continue,
            },
            None => Value::Null,
        };
        let current = entity.get(fk).unwrap_or(Value::Null);
        if !current.same_key(&desired) {
            tracing::trace!(entity = %entity.describe(), column = fk, value = %desired, "Synchronised foreign key");
            entity.write(fk, desired);
        }
    }
}

/// Does `entity` reference, or link to, an entity that has no key yet?
pub(crate) fn references_unsaved(entity: &Entity) -> bool {
    if referenced_entities(entity).iter().any(|t| t.pk().is_none()) {
        return true;
    }
    let mapper = entity.mapper();
    entity.loaded_relations().into_iter().any(|(name, related)| {
        mapper.relationship(&name).is_some_and(|r| r.is_many_to_many())
            && related.as_many().iter().any(|m| m.pk().is_none())
    })
}

/// The relationship on the other side of `rel`, declared on `rel`'s target.
pub(crate) fn reverse_relationship<'a>(
    registry: &'a SchemaRegistry,
    mapper: &Mapper,
    rel: &RelationshipInfo,
) -> Option<&'a RelationshipInfo> {
    let target = registry.mapper(rel.target);
    target.relationships().iter().find(|r| {
        if !registry.is_a(mapper.id(), r.target) {
            return false;
        }
        match rel.kind {
            RelationshipKind::ManyToMany => {
                r.is_many_to_many()
                    && r.association.as_ref() == rel.association.as_ref().map(|a| a.reversed()).as_ref()
            }
            RelationshipKind::ManyToOne => {
                r.kind == RelationshipKind::OneToMany && r.foreign_key == rel.foreign_key
            }
            RelationshipKind::OneToMany => r.is_owning_to_one() && r.foreign_key == rel.foreign_key,
            RelationshipKind::OneToOne => {
                r.kind == RelationshipKind::OneToOne
                    && r.owning != rel.owning
                    && r.foreign_key == rel.foreign_key
            }
        }
    })
}

/// Point the members of loaded one-to-many and reverse one-to-one values of
/// `entity` back at it, so their foreign keys follow.
pub(crate) fn backfill_reverse_references(registry: &SchemaRegistry, entity: &Entity) {
    let mapper = entity.mapper();
    for (name, related) in entity.loaded_relations() {
        let Some(rel) = mapper.relationship(&name) else {
            continue;
        };
        if rel.owning || rel.is_many_to_many() {
            continue;
        }
        let Some(reverse) = reverse_relationship(registry, &mapper, rel) else {
            continue;
        };
        for member in related.as_many() {
            let points_here = member
                .related(&reverse.name)
                .and_then(Related::into_one)
                .is_some_and(|current| current.ptr_eq(entity));
            if !points_here {
                tracing::trace!(
                    member = %member.describe(),
                    relationship = %reverse.name,
                    "Back-populated reverse reference"
                );
                member.cache_relation(&reverse.name, Related::One(Some(entity.clone())));
            }
        }
    }
}

fn run<E: Engine + ?Sized>(engine: &mut E, stmt: &Statement, stats: &mut FlushStats) -> Result<()> {
    tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing statement");
    engine.execute(&stmt.sql, &stmt.params)?;
    stats.statements += 1;
    Ok(())
}

/// Insert the rows of `entity` and return its primary key.
///
/// The first write goes through `execute_insert`; for CLASS hierarchies the
/// key it generates fills the key column of every later table. Written
/// values, defaults included, are copied back onto the entity.
pub(crate) fn insert_entity<E: Engine + ?Sized>(
    engine: &mut E,
    registry: &SchemaRegistry,
    entity: &Entity,
    stats: &mut FlushStats,
) -> Result<Value> {
    let mapper = entity.mapper();
    let writes = plan_insert(registry, &mapper, &entity.values());
    let mut pk = entity.pk();
    let mut written = Vec::new();

    for (i, write) in writes.into_iter().enumerate() {
        let mut row = write.values;
        if write.key_from_parent {
            let key = pk.clone().ok_or_else(|| {
                Error::InvalidState(format!(
                    "no key generated for {} before writing {}",
                    mapper.name(),
                    write.table
                ))
            })?;
            row.insert(0, (write.key_column.clone(), key));
        }
        let stmt = InsertBuilder::new(&write.table).values(row.clone()).build()?;
        if i == 0 {
            tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing insert");
            let generated = engine.execute_insert(&stmt.sql, &stmt.params)?;
            stats.statements += 1;
            if pk.is_none() && !generated.is_null() {
                pk = Some(generated);
            }
        } else {
            run(engine, &stmt, stats)?;
        }
        written.extend(row);
    }

    let pk = pk.ok_or_else(|| {
        Error::InvalidState(format!("insert of {} produced no primary key", mapper.name()))
    })?;
    entity.merge_values(written);
    entity.write(mapper.primary_key(), pk.clone());
    stats.inserted += 1;
    Ok(pk)
}

/// Write `changed` columns of a stored entity. Returns statements issued.
pub(crate) fn update_entity<E: Engine + ?Sized>(
    engine: &mut E,
    registry: &SchemaRegistry,
    entity: &Entity,
    changed: &[(String, Value)],
    stats: &mut FlushStats,
) -> Result<usize> {
    let mapper = entity.mapper();
    let pk = entity
        .pk()
        .ok_or_else(|| Error::InvalidState(format!("cannot update {} without a primary key", entity.describe())))?;
    let writes = plan_update(registry, &mapper, changed);
    for write in &writes {
        let stmt = UpdateBuilder::new(&write.table, &write.key_column, pk.clone())
            .set_all(write.values.iter().cloned())
            .build()?;
        run(engine, &stmt, stats)?;
    }
    if !writes.is_empty() {
        stats.updated += 1;
    }
    Ok(writes.len())
}

/// Delete the rows of a stored entity along with its association rows.
pub(crate) fn delete_entity<E: Engine + ?Sized>(
    engine: &mut E,
    registry: &SchemaRegistry,
    entity: &Entity,
    stats: &mut FlushStats,
) -> Result<()> {
    let mapper = entity.mapper();
    let pk = entity
        .pk()
        .ok_or_else(|| Error::InvalidState(format!("cannot delete {} without a primary key", entity.describe())))?;

    let mut cleaned = HashSet::new();
    for rel in mapper.relationships() {
        let Some(assoc) = &rel.association else {
            continue;
        };
        if !cleaned.insert((assoc.name.clone(), assoc.local_key.clone())) {
            continue;
        }
        let stmt = AssociationStatements::new(assoc).cleanup(&pk)?;
        run(engine, &stmt, stats)?;
    }

    for (table, key_column) in plan_delete(registry, &mapper) {
        let stmt = DeleteBuilder::new(table, key_column, pk.clone()).build()?;
        run(engine, &stmt, stats)?;
    }
    stats.deleted += 1;
    Ok(())
}

/// Apply many-to-many changes of `entity`.
///
/// `seen` spans the whole flush: when both sides of a link changed, the
/// association row is written once.
pub(crate) fn sync_collections<E: Engine + ?Sized>(
    engine: &mut E,
    entity: &Entity,
    changes: &[CollectionChange],
    seen: &mut HashSet<String>,
    stats: &mut FlushStats,
) -> Result<()> {
    if changes.is_empty() {
        return Ok(());
    }
    let mapper = entity.mapper();
    let local = entity
        .pk()
        .ok_or_else(|| Error::InvalidState(format!("cannot link {} without a primary key", entity.describe())))?;

    for change in changes {
        let Some(assoc) = mapper
            .relationship(&change.relationship)
            .and_then(|r| r.association.as_ref())
        else {
            continue;
        };
        let statements = AssociationStatements::new(assoc);

        if change.replace && seen.insert(format!("*{}|{}={}", assoc.name, assoc.local_key, local)) {
            run(engine, &statements.cleanup(&local)?, stats)?;
        }
        for remote in &change.removed {
            if seen.insert(link_key('-', &assoc.name, (&assoc.local_key, &local), (&assoc.remote_key, remote))) {
                run(engine, &statements.delete(&local, remote)?, stats)?;
                stats.links_removed += 1;
            }
        }
        for remote in &change.added {
            if seen.insert(link_key('+', &assoc.name, (&assoc.local_key, &local), (&assoc.remote_key, remote))) {
                run(engine, &statements.insert(&local, remote)?, stats)?;
                stats.links_added += 1;
            }
        }
    }
    Ok(())
}

/// Side-independent identity of one association row change.
fn link_key(op: char, table: &str, a: (&str, &Value), b: (&str, &Value)) -> String {
    let (first, second) = if a.0 <= b.0 { (a, b) } else { (b, a) };
    format!("{op}{table}|{}={}|{}={}", first.0, first.1, second.0, second.1)
}
