//! Unit of Work: the queue of pending writes.
//!
//! The Unit of Work records every add, update and delete in the order the
//! caller made them. Flush takes the whole queue, orders the inserts by
//! dependency and leaves updates and deletes in their original relative
//! order. When a flush cannot proceed (for example on a dependency cycle)
//! the operations are put back untouched.

use std::collections::VecDeque;

use crate::entity::Entity;

/// A queued write for one entity.
#[derive(Debug, Clone)]
pub enum PendingOp {
    Insert(Entity),
    Update(Entity),
    Delete(Entity),
}

impl PendingOp {
    pub fn entity(&self) -> &Entity {
        match self {
            PendingOp::Insert(e) | PendingOp::Update(e) | PendingOp::Delete(e) => e,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, PendingOp::Insert(_))
    }

    pub fn is_update(&self) -> bool {
        matches!(self, PendingOp::Update(_))
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, PendingOp::Delete(_))
    }
}

/// Number of queued operations by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// FIFO queue of pending operations.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    queue: VecDeque<PendingOp>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, entity: &Entity, pred: fn(&PendingOp) -> bool) -> Option<usize> {
        self.queue
            .iter()
            .position(|op| pred(op) && op.entity().ptr_eq(entity))
    }

    /// Queue an INSERT unless one is already queued.
    pub fn push_insert(&mut self, entity: &Entity) {
        if self.position(entity, PendingOp::is_insert).is_none() {
            self.queue.push_back(PendingOp::Insert(entity.clone()));
        }
    }

    /// Queue an UPDATE unless one is already queued.
    pub fn push_update(&mut self, entity: &Entity) {
        if self.position(entity, PendingOp::is_update).is_none() {
            self.queue.push_back(PendingOp::Update(entity.clone()));
        }
    }

    /// Queue a DELETE. A queued UPDATE of the same entity is dropped.
    pub fn push_delete(&mut self, entity: &Entity) {
        self.cancel_update(entity);
        if self.position(entity, PendingOp::is_delete).is_none() {
            self.queue.push_back(PendingOp::Delete(entity.clone()));
        }
    }

    /// Drop a queued INSERT. Returns whether one was queued.
    pub fn cancel_insert(&mut self, entity: &Entity) -> bool {
        self.remove(entity, PendingOp::is_insert)
    }

    /// Drop a queued UPDATE. Returns whether one was queued.
    pub fn cancel_update(&mut self, entity: &Entity) -> bool {
        self.remove(entity, PendingOp::is_update)
    }

    /// Drop a queued DELETE. Returns whether one was queued.
    pub fn cancel_delete(&mut self, entity: &Entity) -> bool {
        self.remove(entity, PendingOp::is_delete)
    }

    fn remove(&mut self, entity: &Entity, pred: fn(&PendingOp) -> bool) -> bool {
        match self.position(entity, pred) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn has_insert(&self, entity: &Entity) -> bool {
        self.position(entity, PendingOp::is_insert).is_some()
    }

    pub fn has_update(&self, entity: &Entity) -> bool {
        self.position(entity, PendingOp::is_update).is_some()
    }

    pub fn has_delete(&self, entity: &Entity) -> bool {
        self.position(entity, PendingOp::is_delete).is_some()
    }

    /// Entities with a queued INSERT, in queue order.
    pub fn pending_inserts(&self) -> Vec<Entity> {
        self.queue
            .iter()
            .filter(|op| op.is_insert())
            .map(|op| op.entity().clone())
            .collect()
    }

    pub fn counts(&self) -> PendingCounts {
        let mut counts = PendingCounts::default();
        for op in &self.queue {
            match op {
                PendingOp::Insert(_) => counts.inserts += 1,
                PendingOp::Update(_) => counts.updates += 1,
                PendingOp::Delete(_) => counts.deletes += 1,
            }
        }
        counts
    }

    /// Take every queued operation, leaving the queue empty.
    pub fn take(&mut self) -> Vec<PendingOp> {
        self.queue.drain(..).collect()
    }

    /// Put operations back at the front of the queue, in their order.
    pub fn restore(&mut self, ops: Vec<PendingOp>) {
        for op in ops.into_iter().rev() {
            self.queue.push_front(op);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOp> {
        self.queue.iter()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
