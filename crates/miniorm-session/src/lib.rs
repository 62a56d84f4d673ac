//! Session and Unit of Work for miniorm.
//!
//! `miniorm-session` is the **unit-of-work layer**. It coordinates object
//! identity, change tracking and transactional persistence on top of an
//! [`Engine`].
//!
//! # Role In The Architecture
//!
//! - **Identity map**: ensures a single in-memory instance per primary key.
//! - **Change tracking**: snapshots detect modified instances at flush time.
//! - **Unit of work**: queued inserts, updates and deletes, written in
//!   dependency order by [`Session::flush`].
//! - **Transactional safety**: a failed flush rolls back both the engine
//!   transaction and the in-memory lifecycle state.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(engine, registry);
//!
//! let owner = session.new_entity("Owner")?;
//! owner.set("name", "Ann")?;
//! let pet = session.new_entity("Pet")?;
//! pet.set("name", "Rex")?;
//! pet.set_related("owner", Some(&owner))?;
//!
//! // Cascades to the owner; both rows are written parent first.
//! session.add(&pet)?;
//! session.commit()?;
//!
//! let rex = session.query("Pet")?.filter_by("name", "Rex").first()?;
//! ```

pub mod change_tracker;
pub mod entity;
pub mod flush;
pub mod identity_map;
pub mod query;
pub mod unit_of_work;

pub use change_tracker::{ChangeTracker, CollectionChange, ObjectSnapshot};
pub use entity::{Entity, ObjectState, Related};
pub use flush::{DependencyGraph, FlushStats};
pub use identity_map::{IdentityMap, ObjectKey};
pub use query::Query;
pub use unit_of_work::{PendingCounts, PendingOp, UnitOfWork};

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use miniorm_core::{ClassId, Engine, Error, Result, SchemaRegistry, Value};
use miniorm_query::{Expr, Select};

use crate::entity::SessionToken;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether to begin a transaction before the first flush writes.
    pub auto_begin: bool,
    /// Whether to flush pending work before queries and lazy loads.
    pub auto_flush: bool,
    /// Whether to expire objects after commit (reload on next read).
    pub expire_on_commit: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_begin: true,
            auto_flush: true,
            expire_on_commit: true,
        }
    }
}

/// Rows written by flushes of the current transaction.
#[derive(Debug, Default)]
struct Journal {
    inserted: Vec<Entity>,
    deleted: Vec<Entity>,
}

impl Journal {
    fn clear(&mut self) {
        self.inserted.clear();
        self.deleted.clear();
    }
}

// ============================================================================
// Session
// ============================================================================

/// The Session is the central unit-of-work manager.
///
/// It tracks instances loaded from or added to the store and coordinates
/// flushing changes back. A session is single-threaded; use one per unit
/// of work and share the [`SchemaRegistry`] between them.
pub struct Session<E: Engine> {
    /// The data engine.
    engine: E,
    registry: Arc<SchemaRegistry>,
    config: SessionConfig,
    /// Held weakly by every attached entity.
    token: Rc<SessionToken>,
    identity_map: IdentityMap,
    tracker: ChangeTracker,
    unit_of_work: UnitOfWork,
    journal: Journal,
    /// Reentrancy guard for autoflush.
    in_flush: bool,
    in_transaction: bool,
}

impl<E: Engine> Session<E> {
    /// Create a new session with the default configuration.
    pub fn new(engine: E, registry: Arc<SchemaRegistry>) -> Self {
        Self::with_config(engine, registry, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(engine: E, registry: Arc<SchemaRegistry>, config: SessionConfig) -> Self {
        let token = SessionToken::new();
        tracing::debug!(session = token.id, "Opened session");
        Self {
            engine,
            registry,
            config,
            token,
            identity_map: IdentityMap::new(),
            tracker: ChangeTracker::new(),
            unit_of_work: UnitOfWork::new(),
            journal: Journal::default(),
            in_flush: false,
            in_transaction: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a TRANSIENT instance of `class`.
    pub fn new_entity(&self, class: &str) -> Result<Entity> {
        let mapper = self.registry.by_name(class)?;
        if mapper.is_abstract() {
            return Err(Error::InvalidState(format!(
                "{} is abstract and cannot be instantiated",
                mapper.name()
            )));
        }
        Ok(Entity::new(Arc::clone(mapper)))
    }

    // ========================================================================
    // Object Operations
    // ========================================================================

    /// Add an instance to the session.
    ///
    /// TRANSIENT instances are queued for INSERT together with every
    /// TRANSIENT instance reachable through their loaded relationships.
    /// DETACHED instances with a primary key are re-attached as PERSISTENT;
    /// adding a DELETED instance before flush cancels its delete.
    pub fn add(&mut self, entity: &Entity) -> Result<()> {
        if entity.bound_elsewhere(&self.token) {
            return Err(Error::InvalidState(format!(
                "{} is attached to another session",
                entity.describe()
            )));
        }

        match entity.state() {
            ObjectState::Transient => self.queue_insert(entity),
            ObjectState::Pending => {
                if !entity.belongs_to(&self.token) || !self.unit_of_work.has_insert(entity) {
                    self.queue_insert(entity);
                }
            }
            ObjectState::Deleted => {
                if !entity.belongs_to(&self.token) || !self.unit_of_work.cancel_delete(entity) {
                    return Err(Error::InvalidState(format!(
                        "{} has already been deleted",
                        entity.describe()
                    )));
                }
                entity.set_state(ObjectState::Persistent);
                tracing::debug!(entity = %entity.describe(), "Cancelled pending delete");
            }
            ObjectState::Persistent | ObjectState::Expired if entity.belongs_to(&self.token) => {
                self.ensure_registered(entity)?;
            }
            ObjectState::Persistent | ObjectState::Expired | ObjectState::Detached => {
                self.reattach(entity)?;
            }
        }

        self.cascade_add(entity);
        Ok(())
    }

    /// Queue an UPDATE for a PERSISTENT or EXPIRED instance.
    ///
    /// Modified instances are found by snapshot diff at flush time; this is
    /// needed only for instances without a snapshot (re-attached ones).
    pub fn update(&mut self, entity: &Entity) -> Result<()> {
        if !entity.belongs_to(&self.token) || !entity.state().is_persistent() {
            return Err(Error::InvalidState(format!(
                "cannot update {} in state {}",
                entity.describe(),
                entity.state()
            )));
        }
        self.ensure_registered(entity)?;
        self.unit_of_work.push_update(entity);
        Ok(())
    }

    /// Mark an instance for deletion.
    ///
    /// Dependents holding a cascading foreign key to it are deleted first.
    /// Deleting a PENDING instance cancels its insert instead.
    pub fn delete(&mut self, entity: &Entity) -> Result<()> {
        let mine = entity.belongs_to(&self.token);
        match entity.state() {
            ObjectState::Deleted => Ok(()),
            ObjectState::Pending if mine => {
                self.unit_of_work.cancel_insert(entity);
                entity.set_state(ObjectState::Transient);
                entity.detach();
                tracing::debug!(entity = %entity.describe(), "Cancelled pending insert");
                Ok(())
            }
            ObjectState::Persistent | ObjectState::Expired if mine => self.delete_persistent(entity),
            state => Err(Error::InvalidState(format!(
                "cannot delete {} in state {}",
                entity.describe(),
                state
            ))),
        }
    }

    fn delete_persistent(&mut self, entity: &Entity) -> Result<()> {
        let previous = entity.state();
        entity.set_state(ObjectState::Deleted);
        self.unit_of_work.cancel_update(entity);

        let cascaded = self.find_dependents(entity).and_then(|dependents| {
            for dependent in dependents {
                if dependent.state() != ObjectState::Deleted {
                    tracing::debug!(
                        parent = %entity.describe(),
                        dependent = %dependent.describe(),
                        "Cascading delete"
                    );
                    self.delete_persistent(&dependent)?;
                }
            }
            Ok(())
        });
        if let Err(e) = cascaded {
            entity.set_state(previous);
            return Err(e);
        }

        self.unit_of_work.push_delete(entity);
        tracing::debug!(entity = %entity.describe(), "Queued delete");
        Ok(())
    }

    /// Stored instances holding a cascading foreign key to `entity`.
    fn find_dependents(&mut self, entity: &Entity) -> Result<Vec<Entity>> {
        let Some(pk) = entity.pk() else {
            return Ok(Vec::new());
        };
        let registry = Arc::clone(&self.registry);
        let lineage = registry.lineage(entity.class_id());

        let mut holders = Vec::new();
        for mapper in registry.mappers() {
            for rel in mapper.relationships() {
                let is_link = mapper.parent_link().is_some_and(|link| link.name == rel.name);
                if rel.is_owning_to_one()
                    && rel.cascade_delete
                    && rel.declared_by == mapper.id()
                    && lineage.contains(&rel.target)
                    && !is_link
                {
                    if let Some(fk) = &rel.foreign_key {
                        holders.push((mapper.id(), fk.clone()));
                    }
                }
            }
        }

        let mut found: Vec<Entity> = Vec::new();
        for (class, fk) in holders {
            let select = Select::new(class).filter(Expr::col(fk).eq(pk.clone()));
            for dependent in self.fetch(&select)? {
                if !dependent.ptr_eq(entity) && !found.iter().any(|f| f.ptr_eq(&dependent)) {
                    found.push(dependent);
                }
            }
        }
        Ok(found)
    }

    /// Get an instance by primary key.
    ///
    /// Returns the identity-map instance when there is one, otherwise
    /// queries for the row. `None` if no such row exists.
    pub fn get(&mut self, class: &str, pk: impl Into<Value>) -> Result<Option<Entity>> {
        let class = self.registry.by_name(class)?.id();
        self.get_by_id(class, pk.into())
    }

    fn get_by_id(&mut self, class: ClassId, pk: Value) -> Result<Option<Entity>> {
        if pk.is_null() {
            return Ok(None);
        }
        let mapper = Arc::clone(self.registry.mapper(class));
        if let Some(hit) = self.identity_map.get(mapper.identity_class(), &pk) {
            tracing::debug!(entity = %hit.describe(), "Identity map hit");
            if hit.state() == ObjectState::Deleted || !self.registry.is_a(hit.class_id(), class) {
                return Ok(None);
            }
            return Ok(Some(hit));
        }

        self.autoflush()?;
        let select = Select::new(class)
            .filter(Expr::col(mapper.primary_key()).eq(pk))
            .limit(1);
        Ok(self.fetch(&select)?.into_iter().next())
    }

    /// Start a query for `class` and its subclasses.
    ///
    /// With autoflush enabled, pending work is flushed first so the query
    /// sees this session's own writes.
    pub fn query(&mut self, class: &str) -> Result<Query<'_, E>> {
        let class = self.registry.by_name(class)?.id();
        self.autoflush()?;
        Ok(Query::new(self, Select::new(class)))
    }

    /// Read a column, reloading the instance first if it is EXPIRED.
    pub fn read(&mut self, entity: &Entity, column: &str) -> Result<Option<Value>> {
        let mapper = entity.mapper();
        if !mapper.has_column(column) {
            return Err(Error::UnknownColumn {
                class: mapper.name().to_string(),
                column: column.to_string(),
            });
        }
        if entity.state() == ObjectState::Expired && entity.belongs_to(&self.token) {
            tracing::debug!(entity = %entity.describe(), "Object is expired, reloading from database");
            self.refresh(entity)?;
        }
        Ok(entity.get(column))
    }

    /// Reload an instance's column values from the store.
    ///
    /// Cached relationships are dropped. If the row no longer exists the
    /// instance becomes TRANSIENT and `NotFound` is returned.
    pub fn refresh(&mut self, entity: &Entity) -> Result<()> {
        if !entity.belongs_to(&self.token) {
            return Err(Error::DetachedInstance {
                class: entity.class_name(),
            });
        }
        let pk = match entity.pk() {
            Some(pk) if entity.state().is_persistent() => pk,
            _ => {
                return Err(Error::InvalidState(format!(
                    "cannot refresh {} in state {}",
                    entity.describe(),
                    entity.state()
                )));
            }
        };
        let mapper = entity.mapper();
        let plan = Select::new(mapper.id())
            .filter(Expr::col(mapper.primary_key()).eq(pk.clone()))
            .limit(1)
            .build(&self.registry)?;
        let row = match &plan.statement {
            Some(stmt) => {
                tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Refreshing object from database");
                self.engine.execute(&stmt.sql, &stmt.params)?.into_iter().next()
            }
            None => None,
        };

        let Some(row) = row else {
            tracing::debug!(entity = %entity.describe(), "Object no longer exists in database");
            self.forget(entity);
            self.revert_to_transient(entity);
            return Err(Error::NotFound {
                class: mapper.name().to_string(),
                pk: pk.to_string(),
            });
        };

        entity.replace_values(plan.layout.values(mapper.id(), &row));
        entity.clear_relations();
        entity.set_state(ObjectState::Persistent);
        self.unit_of_work.cancel_update(entity);
        self.ensure_registered(entity)?;
        self.tracker.snapshot(entity);
        Ok(())
    }

    /// Load a relationship, or return its cached value.
    ///
    /// Many-to-one reads go through [`Session::get`]; one-to-many filters
    /// the target by the reverse foreign key; many-to-many joins through
    /// the association table. The result is cached on the instance.
    pub fn load(&mut self, entity: &Entity, relationship: &str) -> Result<Related> {
        let mapper = entity.mapper();
        let rel = mapper
            .relationship(relationship)
            .cloned()
            .ok_or_else(|| Error::UnknownRelationship {
                class: mapper.name().to_string(),
                relationship: relationship.to_string(),
            })?;
        if let Some(cached) = entity.related(&rel.name) {
            tracing::trace!(relationship = %rel.name, "Already loaded");
            return Ok(cached);
        }

        match entity.state() {
            ObjectState::Transient | ObjectState::Pending => return Ok(Related::empty(&rel)),
            ObjectState::Deleted => {
                return Err(Error::InvalidState(format!(
                    "cannot load '{}' of deleted {}",
                    rel.name,
                    entity.describe()
                )));
            }
            _ => {}
        }
        if !entity.belongs_to(&self.token) {
            if entity.pk().is_some() {
                return Err(Error::DetachedInstance {
                    class: mapper.name().to_string(),
                });
            }
            return Ok(Related::empty(&rel));
        }
        if entity.state() == ObjectState::Expired && rel.is_owning_to_one() {
            self.refresh(entity)?;
        }
        let Some(pk) = entity.pk() else {
            return Ok(Related::empty(&rel));
        };

        tracing::debug!(
            entity = %entity.describe(),
            relationship = %rel.name,
            kind = rel.kind.as_str(),
            "Loading relationship"
        );
        let related = if let Some(assoc) = &rel.association {
            self.autoflush()?;
            let members = self.fetch(&Select::new(rel.target).through(assoc.clone(), pk))?;
            let related = Related::Many(members);
            self.tracker.record_collection(entity, &rel.name, &related);
            related
        } else if rel.is_owning_to_one() {
            let fk = rel
                .foreign_key
                .as_deref()
                .and_then(|column| entity.get(column))
                .unwrap_or(Value::Null);
            Related::One(self.get_by_id(rel.target, fk)?)
        } else {
            let fk = rel.foreign_key.clone().ok_or_else(|| {
                Error::InvalidState(format!("relationship '{}' has no foreign key", rel.name))
            })?;
            self.autoflush()?;
            let members = self.fetch(&Select::new(rel.target).filter(Expr::col(fk).eq(pk)))?;
            if rel.kind.is_to_one() {
                Related::One(members.into_iter().next())
            } else {
                Related::Many(members)
            }
        };
        entity.cache_relation(&rel.name, related.clone());
        tracing::debug!(found = related.as_many().len(), "Lazy load complete");
        Ok(related)
    }

    // ========================================================================
    // Transaction Management
    // ========================================================================

    /// Flush pending changes to the database.
    ///
    /// This executes INSERT, UPDATE and DELETE statements but does NOT
    /// commit. On failure the transaction and the in-memory state are
    /// rolled back and the cause is returned wrapped in `Error::Flush`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn flush(&mut self) -> Result<()> {
        if self.in_flush {
            tracing::trace!("Flush already in progress");
            return Ok(());
        }
        self.in_flush = true;
        let result = self.flush_pending();
        self.in_flush = false;
        result
    }

    fn autoflush(&mut self) -> Result<()> {
        if self.config.auto_flush && !self.in_flush {
            self.flush()?;
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        self.prepare_flush();
        self.queue_dirty();
        if self.unit_of_work.is_empty() {
            tracing::trace!("Nothing to flush");
            return Ok(());
        }

        let ops = self.unit_of_work.take();
        let mut inserts = Vec::new();
        // Updates and deletes run after the inserts, in queue order.
        let mut writes = Vec::new();
        for op in &ops {
            let entity = op.entity();
            match op {
                PendingOp::Insert(_) if entity.state() == ObjectState::Pending => {
                    inserts.push(entity.clone());
                }
                PendingOp::Update(_) if entity.state().is_persistent() => writes.push(op.clone()),
                PendingOp::Delete(_) if entity.state() == ObjectState::Deleted => {
                    writes.push(op.clone());
                }
                _ => tracing::trace!(entity = %entity.describe(), "Skipping stale operation"),
            }
        }

        let order = match DependencyGraph::from_inserts(inserts).order() {
            Ok(order) => order,
            Err(cycle) => {
                tracing::warn!(entities = ?cycle.entities, "Dependency cycle, flush aborted");
                self.unit_of_work.restore(ops);
                return Err(Error::Cycle(cycle));
            }
        };

        match self.execute_flush(&order, &writes) {
            Ok(stats) => {
                tracing::info!(
                    inserted = stats.inserted,
                    updated = stats.updated,
                    deleted = stats.deleted,
                    links_added = stats.links_added,
                    links_removed = stats.links_removed,
                    statements = stats.statements,
                    "Flushed session"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Flush failed, rolling back");
                self.unit_of_work.restore(ops);
                if let Err(rollback) = self.rollback_state() {
                    tracing::warn!(error = %rollback, "Engine rollback failed");
                }
                Err(Error::flush(e))
            }
        }
    }

    /// Cascade-add, back-populate reverse references and copy referenced
    /// keys into foreign-key columns.
    fn prepare_flush(&mut self) {
        let mut roots = self.identity_map.entities();
        roots.extend(self.unit_of_work.pending_inserts());
        for entity in &roots {
            self.cascade_add(entity);
        }

        let mut live = self.identity_map.entities();
        live.extend(self.unit_of_work.pending_inserts());
        live.retain(|e| e.state() != ObjectState::Deleted);
        for entity in &live {
            flush::backfill_reverse_references(&self.registry, entity);
        }
        for entity in &live {
            flush::sync_foreign_keys(entity);
        }
    }

    /// Queue updates for stored instances that changed since their snapshot.
    fn queue_dirty(&mut self) {
        for entity in self.identity_map.entities() {
            if !entity.state().is_persistent()
                || self.unit_of_work.has_update(&entity)
                || self.unit_of_work.has_delete(&entity)
            {
                continue;
            }
            if self.tracker.is_modified(&entity) || flush::references_unsaved(&entity) {
                tracing::debug!(entity = %entity.describe(), "Detected modified object");
                self.unit_of_work.push_update(&entity);
            }
        }
    }

    fn execute_flush(
        &mut self,
        inserts: &[Entity],
        writes: &[PendingOp],
    ) -> Result<FlushStats> {
        let registry = Arc::clone(&self.registry);
        let mut stats = FlushStats::default();

        if self.config.auto_begin && !self.in_transaction {
            self.engine.begin()?;
            self.in_transaction = true;
            tracing::debug!("Began transaction");
        }

        let mut touched: Vec<(Entity, bool)> = Vec::new();
        for entity in inserts {
            flush::sync_foreign_keys(entity);
            let pk = flush::insert_entity(&mut self.engine, &registry, entity, &mut stats)?;
            entity.set_state(ObjectState::Persistent);
            self.journal.inserted.push(entity.clone());
            if let Err(existing) = self
                .identity_map
                .insert(entity.mapper().identity_class(), &pk, entity)
            {
                return Err(Error::InvalidState(format!(
                    "{} collides with {} already in the session",
                    entity.describe(),
                    existing.describe()
                )));
            }
            tracing::debug!(entity = %entity.describe(), "Inserted object");
            touched.push((entity.clone(), true));
        }

        for op in writes {
            match op {
                PendingOp::Update(entity) => {
                    self.write_update(&registry, entity, &mut stats)?;
                    touched.push((entity.clone(), false));
                }
                PendingOp::Delete(entity) => {
                    flush::delete_entity(&mut self.engine, &registry, entity, &mut stats)?;
                    self.identity_map.remove_entity(entity);
                    self.tracker.remove(entity);
                    entity.detach();
                    self.journal.deleted.push(entity.clone());
                    tracing::debug!(entity = %entity.describe(), "Deleted object");
                }
                PendingOp::Insert(_) => {}
            }
        }

        let mut seen = HashSet::new();
        for (entity, inserted) in &touched {
            let changes = self.tracker.collection_changes(entity, *inserted);
            flush::sync_collections(&mut self.engine, entity, &changes, &mut seen, &mut stats)?;
        }
        for (entity, _) in &touched {
            self.tracker.snapshot(entity);
        }
        Ok(stats)
    }

    /// Write the changed columns of a stored instance, or every column when
    /// it has no snapshot.
    fn write_update(
        &mut self,
        registry: &SchemaRegistry,
        entity: &Entity,
        stats: &mut FlushStats,
    ) -> Result<()> {
        flush::sync_foreign_keys(entity);
        let pk_column = entity.mapper().primary_key().to_string();
        let changed: Vec<(String, Value)> = self
            .tracker
            .changed_columns(entity)
            .unwrap_or_else(|| entity.values().into_iter().collect())
            .into_iter()
            .filter(|(column, _)| *column != pk_column)
            .collect();
        if changed.is_empty() {
            tracing::trace!(entity = %entity.describe(), "No column changes");
            return Ok(());
        }
        flush::update_entity(&mut self.engine, registry, entity, &changed, stats)?;
        Ok(())
    }

    /// Flush, commit the transaction and expire every PERSISTENT instance.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn commit(&mut self) -> Result<()> {
        self.flush()?;

        if self.in_transaction {
            if let Err(e) = self.engine.commit() {
                tracing::warn!(error = %e, "Commit failed, rolling back");
                if let Err(rollback) = self.rollback_state() {
                    tracing::warn!(error = %rollback, "Engine rollback failed");
                }
                return Err(Error::flush(e));
            }
            self.in_transaction = false;
        }
        self.journal.clear();

        let mut expired = 0;
        if self.config.expire_on_commit {
            for entity in self.identity_map.entities() {
                if entity.state() == ObjectState::Persistent {
                    entity.set_state(ObjectState::Expired);
                    expired += 1;
                }
            }
        }
        tracing::info!(tracked = self.identity_map.len(), expired, "Committed session");
        Ok(())
    }

    /// Roll back the transaction and restore instance states.
    ///
    /// Inserted and pending instances become TRANSIENT with their primary
    /// key cleared; updated and deleted ones become PERSISTENT. The
    /// identity map and every snapshot are cleared.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn rollback(&mut self) -> Result<()> {
        let discarded = self.unit_of_work.len();
        let result = self.rollback_state();
        tracing::info!(discarded, "Rolled back session");
        result
    }

    /// Returns the engine's rollback result; session state is always reset.
    fn rollback_state(&mut self) -> Result<()> {
        let engine_result = if self.in_transaction {
            self.in_transaction = false;
            self.engine.rollback()
        } else {
            Ok(())
        };

        for op in self.unit_of_work.take() {
            match op {
                PendingOp::Insert(entity) => self.revert_to_transient(&entity),
                PendingOp::Update(entity) => entity.set_state(ObjectState::Persistent),
                PendingOp::Delete(entity) => {
                    entity.set_state(ObjectState::Persistent);
                    entity.attach(&self.token);
                }
            }
        }
        for entity in std::mem::take(&mut self.journal.deleted) {
            entity.set_state(ObjectState::Persistent);
            entity.attach(&self.token);
        }
        for entity in std::mem::take(&mut self.journal.inserted) {
            self.revert_to_transient(&entity);
        }

        self.identity_map.clear();
        self.tracker.clear();
        engine_result
    }

    /// Detach every tracked instance, roll back and clear all state.
    ///
    /// Instances whose insert never committed (queued, or flushed in the
    /// open transaction) become TRANSIENT with their primary key cleared;
    /// every other tracked instance becomes DETACHED.
    pub fn close(&mut self) -> Result<()> {
        let mut inserted = self.unit_of_work.pending_inserts();
        if self.in_transaction {
            inserted.extend(self.journal.inserted.drain(..));
        }

        let mut tracked = self.identity_map.entities();
        tracked.extend(
            self.unit_of_work
                .iter()
                .filter(|op| !op.is_insert())
                .map(|op| op.entity().clone()),
        );
        tracked.extend(self.journal.deleted.drain(..));
        tracked.retain(|entity| !inserted.iter().any(|i| i.ptr_eq(entity)));
        for entity in &tracked {
            entity.detach();
            entity.set_state(ObjectState::Detached);
        }

        let result = if self.in_transaction {
            self.in_transaction = false;
            self.engine.rollback()
        } else {
            Ok(())
        };
        for entity in &inserted {
            self.revert_to_transient(entity);
        }

        self.unit_of_work.clear();
        self.journal.clear();
        self.identity_map.clear();
        self.tracker.clear();
        tracing::debug!(
            session = self.token.id,
            detached = tracked.len(),
            reverted = inserted.len(),
            "Closed session"
        );
        result
    }

    // ========================================================================
    // Hydration
    // ========================================================================

    /// Run a select and reconcile its rows with the identity map.
    pub(crate) fn fetch(&mut self, select: &Select) -> Result<Vec<Entity>> {
        let plan = select.build(&self.registry)?;
        let Some(stmt) = &plan.statement else {
            return Ok(Vec::new());
        };
        tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing query");
        let rows = self.engine.execute(&stmt.sql, &stmt.params)?;

        let mut out: Vec<Entity> = Vec::with_capacity(rows.len());
        for row in &rows {
            let class = plan.layout.resolve_class(&self.registry, row);
            let values = plan.layout.values(class, row);
            if let Some(entity) = self.hydrate(class, values) {
                if !out.iter().any(|e| e.ptr_eq(&entity)) {
                    out.push(entity);
                }
            }
        }
        tracing::debug!(rows = rows.len(), entities = out.len(), "Hydrated rows");
        Ok(out)
    }

    fn hydrate(&mut self, class: ClassId, values: BTreeMap<String, Value>) -> Option<Entity> {
        let mapper = Arc::clone(self.registry.mapper(class));
        let pk = values
            .get(mapper.primary_key())
            .filter(|v| !v.is_null())
            .cloned()?;
        let key_class = mapper.identity_class();

        if let Some(existing) = self.identity_map.get(key_class, &pk) {
            match existing.state() {
                ObjectState::Deleted => return None,
                ObjectState::Expired => {
                    existing.replace_values(values);
                    existing.clear_relations();
                    existing.set_state(ObjectState::Persistent);
                    self.tracker.snapshot(&existing);
                }
                _ => {}
            }
            return Some(existing);
        }

        let entity = Entity::from_parts(mapper, values, ObjectState::Persistent);
        entity.attach(&self.token);
        match self.identity_map.insert(key_class, &pk, &entity) {
            Ok(()) => {
                self.tracker.snapshot(&entity);
                Some(entity)
            }
            Err(existing) => Some(existing),
        }
    }

    // ========================================================================
    // State Helpers
    // ========================================================================

    fn queue_insert(&mut self, entity: &Entity) {
        entity.set_state(ObjectState::Pending);
        entity.attach(&self.token);
        self.unit_of_work.push_insert(entity);
        tracing::debug!(entity = %entity.describe(), "Queued insert");
    }

    /// Queue every TRANSIENT instance reachable from `root`.
    fn cascade_add(&mut self, root: &Entity) {
        let mut stack = vec![root.clone()];
        let mut visited = HashSet::new();
        while let Some(entity) = stack.pop() {
            if !visited.insert(entity.addr()) {
                continue;
            }
            for (_, related) in entity.loaded_relations() {
                for member in related.into_many() {
                    if member.state() == ObjectState::Transient && !member.bound_elsewhere(&self.token) {
                        tracing::debug!(
                            from = %entity.describe(),
                            entity = %member.describe(),
                            "Cascading add"
                        );
                        self.queue_insert(&member);
                    }
                    if member.belongs_to(&self.token) {
                        stack.push(member);
                    }
                }
            }
        }
    }

    /// Attach a DETACHED instance. With a primary key it becomes
    /// PERSISTENT (without a snapshot), otherwise it is queued for insert.
    fn reattach(&mut self, entity: &Entity) -> Result<()> {
        let Some(pk) = entity.pk() else {
            self.queue_insert(entity);
            return Ok(());
        };
        let class = entity.mapper().identity_class();
        if let Some(existing) = self.identity_map.get(class, &pk) {
            if !existing.ptr_eq(entity) {
                return Err(Error::InvalidState(format!(
                    "another instance of {} is already in this session",
                    entity.describe()
                )));
            }
        }
        entity.attach(&self.token);
        entity.set_state(ObjectState::Persistent);
        self.ensure_registered(entity)?;
        tracing::debug!(entity = %entity.describe(), "Re-attached object");
        Ok(())
    }

    fn ensure_registered(&mut self, entity: &Entity) -> Result<()> {
        let Some(pk) = entity.pk() else {
            return Err(Error::InvalidState(format!(
                "{} has no primary key",
                entity.describe()
            )));
        };
        self.identity_map
            .insert(entity.mapper().identity_class(), &pk, entity)
            .map_err(|_| {
                Error::InvalidState(format!(
                    "another instance of {} is already in this session",
                    entity.describe()
                ))
            })
    }

    /// Drop every trace of `entity` from the session's bookkeeping.
    fn forget(&mut self, entity: &Entity) {
        self.identity_map.remove_entity(entity);
        self.tracker.remove(entity);
        self.unit_of_work.cancel_insert(entity);
        self.unit_of_work.cancel_update(entity);
        self.unit_of_work.cancel_delete(entity);
    }

    /// Clear the primary key (and CLASS key columns) and detach.
    fn revert_to_transient(&self, entity: &Entity) {
        let mapper = entity.mapper();
        entity.clear_value(mapper.primary_key());
        for class in self.registry.lineage(mapper.id()) {
            entity.clear_value(self.registry.mapper(class).key_column());
        }
        entity.set_state(ObjectState::Transient);
        entity.detach();
    }

    // ========================================================================
    // Debug Diagnostics
    // ========================================================================

    /// Queued operations by kind.
    pub fn pending_counts(&self) -> PendingCounts {
        self.unit_of_work.counts()
    }

    /// Instances in the identity map plus those pending insert.
    pub fn tracked_count(&self) -> usize {
        self.identity_map.len() + self.unit_of_work.counts().inserts
    }

    /// Whether we're in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Would the next flush write anything for `entity`?
    pub fn is_modified(&self, entity: &Entity) -> bool {
        if !entity.belongs_to(&self.token) {
            return false;
        }
        match entity.state() {
            ObjectState::Pending => true,
            ObjectState::Persistent | ObjectState::Expired => {
                self.unit_of_work.has_update(entity) || self.tracker.is_modified(entity)
            }
            ObjectState::Deleted => self.unit_of_work.has_delete(entity),
            ObjectState::Transient | ObjectState::Detached => false,
        }
    }

    /// Is `entity` attached to this session?
    pub fn contains(&self, entity: &Entity) -> bool {
        entity.belongs_to(&self.token)
    }
}

impl<E: Engine> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.token.id)
            .field("config", &self.config)
            .field("identity_map", &self.identity_map)
            .field("pending", &self.unit_of_work.counts())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}
