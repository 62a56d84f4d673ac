//! Session-bound queries.
//!
//! A [`Query`] wraps a [`Select`] together with the session that will run
//! it. Results are hydrated through the session's identity map, so a row
//! that is already loaded comes back as the existing instance.

use miniorm_core::{Engine, Result, Statement, Value};
use miniorm_query::{Expr, OrderBy, OrderDirection, Select};

use crate::Session;
use crate::entity::Entity;

/// A SELECT for one entity class (and its subclasses), bound to a session.
///
/// Created by [`Session::query`], which flushes pending work first when
/// autoflush is enabled.
pub struct Query<'s, E: Engine> {
    session: &'s mut Session<E>,
    select: Select,
}

impl<'s, E: Engine> Query<'s, E> {
    pub(crate) fn new(session: &'s mut Session<E>, select: Select) -> Self {
        Self { session, select }
    }

    /// Add a WHERE condition, ANDed with any existing one.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.select = self.select.filter(expr);
        self
    }

    /// Equality filter on a column. A `Null` value becomes `IS NULL`.
    pub fn filter_by(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Expr::col(column).eq(Expr::lit(value)))
    }

    /// Inner-join the target of a relationship.
    pub fn join(mut self, relationship: impl Into<String>) -> Self {
        self.select = self.select.join(relationship);
        self
    }

    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.select = self
            .select
            .order_by(OrderBy::new(Expr::col(column), direction));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.select = self.select.limit(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.select = self.select.offset(n);
        self
    }

    /// The statement this query would run, `None` if no table can hold rows.
    pub fn statement(&self) -> Result<Option<Statement>> {
        Ok(self.select.build(self.session.registry())?.statement)
    }

    /// Run the query and return every matching instance.
    pub fn all(self) -> Result<Vec<Entity>> {
        self.session.fetch(&self.select)
    }

    /// Run the query with `LIMIT 1` and return the first instance.
    pub fn first(self) -> Result<Option<Entity>> {
        let select = self.select.limit(1);
        Ok(self.session.fetch(&select)?.into_iter().next())
    }
}

impl<E: Engine> std::fmt::Debug for Query<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").field("select", &self.select).finish()
    }
}
