//! Statement builders for INSERT, UPDATE, DELETE and association rows.
//!
//! Builders are pure: they validate identifiers, bind every value as a
//! positional parameter and return a [`Statement`]. An unsafe table or
//! column name fails the build before any SQL text exists.

use miniorm_core::{AssociationTable, Error, Result, Statement, Value, quote_ident};

/// INSERT statement builder.
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    values: Vec<(String, Value)>,
}

impl InsertBuilder {
    /// Create a new INSERT builder for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    /// Set one column.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    /// Set several columns, in order.
    pub fn values(mut self, values: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.values.extend(values);
        self
    }

    /// Build the INSERT. With no columns this is `INSERT ... DEFAULT VALUES`.
    pub fn build(&self) -> Result<Statement> {
        let table = quote_ident(&self.table)?;
        if self.values.is_empty() {
            return Ok(Statement::new(
                format!("INSERT INTO {table} DEFAULT VALUES"),
                Vec::new(),
            ));
        }

        let columns = self
            .values
            .iter()
            .map(|(name, _)| quote_ident(name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let placeholders = vec!["?"; self.values.len()];
        let params = self.values.iter().map(|(_, v)| v.clone()).collect();

        Ok(Statement::new(
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ),
            params,
        ))
    }
}

/// UPDATE statement builder, always keyed by a single row's key column.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    key_column: String,
    key: Value,
    values: Vec<(String, Value)>,
}

impl UpdateBuilder {
    /// Create a new UPDATE builder for the row of `table` whose `key_column` is `key`.
    pub fn new(table: impl Into<String>, key_column: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            key: key.into(),
            values: Vec::new(),
        }
    }

    /// Set one column.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    /// Set several columns, in order.
    pub fn set_all(mut self, values: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.values.extend(values);
        self
    }

    /// Build the UPDATE. The key is bound last.
    pub fn build(&self) -> Result<Statement> {
        if self.key.is_null() {
            return Err(Error::InvalidState(format!(
                "cannot update a row of {} without a key",
                self.table
            )));
        }
        if self.values.is_empty() {
            return Err(Error::InvalidState(format!(
                "UPDATE of {} has no columns to set",
                self.table
            )));
        }

        let table = quote_ident(&self.table)?;
        let key_column = quote_ident(&self.key_column)?;
        let mut set_clauses = Vec::with_capacity(self.values.len());
        let mut params = Vec::with_capacity(self.values.len() + 1);
        for (name, value) in &self.values {
            set_clauses.push(format!("{} = ?", quote_ident(name)?));
            params.push(value.clone());
        }
        params.push(self.key.clone());

        Ok(Statement::new(
            format!(
                "UPDATE {table} SET {} WHERE {key_column} = ?",
                set_clauses.join(", ")
            ),
            params,
        ))
    }
}

/// DELETE statement builder for a single row.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    key_column: String,
    key: Value,
}

impl DeleteBuilder {
    /// Create a new DELETE builder for the row of `table` whose `key_column` is `key`.
    pub fn new(table: impl Into<String>, key_column: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            key: key.into(),
        }
    }

    /// Build the DELETE.
    pub fn build(&self) -> Result<Statement> {
        if self.key.is_null() {
            return Err(Error::InvalidState(format!(
                "cannot delete a row of {} without a key",
                self.table
            )));
        }
        Ok(Statement::new(
            format!(
                "DELETE FROM {} WHERE {} = ?",
                quote_ident(&self.table)?,
                quote_ident(&self.key_column)?
            ),
            vec![self.key.clone()],
        ))
    }
}

/// Statements against a many-to-many association table.
#[derive(Debug, Clone, Copy)]
pub struct AssociationStatements<'a> {
    table: &'a AssociationTable,
}

impl<'a> AssociationStatements<'a> {
    pub fn new(table: &'a AssociationTable) -> Self {
        Self { table }
    }

    /// Link `local` to `remote`.
    pub fn insert(&self, local: &Value, remote: &Value) -> Result<Statement> {
        Ok(Statement::new(
            format!(
                "INSERT INTO {} ({}, {}) VALUES (?, ?)",
                quote_ident(&self.table.name)?,
                quote_ident(&self.table.local_key)?,
                quote_ident(&self.table.remote_key)?
            ),
            vec![local.clone(), remote.clone()],
        ))
    }

    /// Unlink `local` from `remote`.
    pub fn delete(&self, local: &Value, remote: &Value) -> Result<Statement> {
        Ok(Statement::new(
            format!(
                "DELETE FROM {} WHERE {} = ? AND {} = ?",
                quote_ident(&self.table.name)?,
                quote_ident(&self.table.local_key)?,
                quote_ident(&self.table.remote_key)?
            ),
            vec![local.clone(), remote.clone()],
        ))
    }

    /// Remove every link of `local`, used when its row is deleted.
    pub fn cleanup(&self, local: &Value) -> Result<Statement> {
        Ok(Statement::new(
            format!(
                "DELETE FROM {} WHERE {} = ?",
                quote_ident(&self.table.name)?,
                quote_ident(&self.table.local_key)?
            ),
            vec![local.clone()],
        ))
    }
}
