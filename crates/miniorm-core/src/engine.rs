//! The data-engine contract.
//!
//! The session never talks to a database directly. It hands generated
//! statements to an [`Engine`], which executes literal SQL with positional
//! parameters and controls the transaction at the driver level.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// A generated SQL statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A blocking connection to the backing store.
///
/// Calls are synchronous; a session issues them one at a time and never
/// shares an engine across threads.
pub trait Engine {
    /// Execute a statement and return its result rows (empty for DML).
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute an INSERT and return the identifier generated for the new row.
    fn execute_insert(&mut self, sql: &str, params: &[Value]) -> Result<Value>;

    /// Begin a transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<()>;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).execute(sql, params)
    }

    fn execute_insert(&mut self, sql: &str, params: &[Value]) -> Result<Value> {
        (**self).execute_insert(sql, params)
    }

    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }
}
