//! Shared fixtures for the integration tests: a scripted engine and a few
//! schemas.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use miniorm::prelude::*;
use miniorm::QueryError;

#[derive(Debug, Default)]
pub struct MockState {
    /// Every statement in execution order, with its parameters.
    pub statements: Vec<(String, Vec<Value>)>,
    /// `BEGIN` / `COMMIT` / `ROLLBACK` calls in order.
    pub transactions: Vec<&'static str>,
    /// Canned SELECT results, matched by SQL substring. Later entries win.
    pub responses: Vec<(String, Vec<Row>)>,
    /// Fail any statement containing this text with a constraint violation.
    pub fail_on: Option<String>,
    pub next_id: i64,
}

/// Engine that records statements instead of running them.
///
/// Clones share state, so a test can keep one handle while the session
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Rc<RefCell<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer SELECTs containing `fragment` with `rows`.
    pub fn respond(&self, fragment: &str, rows: Vec<Row>) {
        self.state
            .borrow_mut()
            .responses
            .push((fragment.to_string(), rows));
    }

    pub fn fail_on(&self, fragment: &str) {
        self.state.borrow_mut().fail_on = Some(fragment.to_string());
    }

    pub fn clear_failure(&self) {
        self.state.borrow_mut().fail_on = None;
    }

    pub fn statements(&self) -> Vec<String> {
        self.state
            .borrow()
            .statements
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn statements_with_params(&self) -> Vec<(String, Vec<Value>)> {
        self.state.borrow().statements.clone()
    }

    /// Statements starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .statements
            .iter()
            .filter(|(sql, _)| sql.starts_with(prefix))
            .count()
    }

    pub fn transactions(&self) -> Vec<&'static str> {
        self.state.borrow().transactions.clone()
    }

    /// Forget recorded statements and transaction calls.
    pub fn clear_log(&self) {
        let mut state = self.state.borrow_mut();
        state.statements.clear();
        state.transactions.clear();
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.statements.push((sql.to_string(), params.to_vec()));
        match &state.fail_on {
            Some(fragment) if sql.contains(fragment.as_str()) => Err(Error::Query(
                QueryError::constraint(sql, "UNIQUE constraint failed"),
            )),
            _ => Ok(()),
        }
    }
}

impl Engine for MockEngine {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params)?;
        if !sql.starts_with("SELECT") {
            return Ok(Vec::new());
        }
        let state = self.state.borrow();
        Ok(state
            .responses
            .iter()
            .rev()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn execute_insert(&mut self, sql: &str, params: &[Value]) -> Result<Value> {
        self.record(sql, params)?;
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        Ok(Value::BigInt(state.next_id))
    }

    fn begin(&mut self) -> Result<()> {
        self.state.borrow_mut().transactions.push("BEGIN");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.state.borrow_mut().transactions.push("COMMIT");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.state.borrow_mut().transactions.push("ROLLBACK");
        Ok(())
    }
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::from_pairs(pairs.iter().map(|(k, v)| (*k, v.clone())))
}

/// `Owner(name, phone)`, `Pet(name, owner)` with `Pet.toys <-> Toy.pets`.
pub fn pets() -> Arc<SchemaRegistry> {
    let mut builder = SchemaRegistry::builder();
    builder
        .register(
            EntityClass::new("Owner")
                .column(ColumnDef::integer("id").primary_key(true))
                .column(ColumnDef::text("name"))
                .column(ColumnDef::text("phone")),
        )
        .unwrap();
    builder
        .register(
            EntityClass::new("Pet")
                .column(ColumnDef::integer("id").primary_key(true))
                .column(ColumnDef::text("name"))
                .relationship(
                    "owner",
                    Relationship::many_to_one("Owner")
                        .backref("pets")
                        .cascade_delete(true),
                )
                .relationship("toys", Relationship::many_to_many("Toy").backref("pets")),
        )
        .unwrap();
    builder
        .register(
            EntityClass::new("Toy")
                .column(ColumnDef::integer("id").primary_key(true))
                .column(ColumnDef::text("label")),
        )
        .unwrap();
    builder.finalize().unwrap()
}

/// Single-table `Employee` with a `Manager` subclass.
pub fn employees() -> Arc<SchemaRegistry> {
    let mut builder = SchemaRegistry::builder();
    builder
        .register(
            EntityClass::new("Employee")
                .inheritance("single")
                .column(ColumnDef::integer("id").primary_key(true))
                .column(ColumnDef::text("name")),
        )
        .unwrap();
    builder
        .register(
            EntityClass::new("Manager")
                .inherits("Employee")
                .column(ColumnDef::integer("reports")),
        )
        .unwrap();
    builder.finalize().unwrap()
}

/// Joined-table `Animal` with a `Dog` subclass.
pub fn animals() -> Arc<SchemaRegistry> {
    let mut builder = SchemaRegistry::builder();
    builder
        .register(
            EntityClass::new("Animal")
                .column(ColumnDef::integer("id").primary_key(true))
                .column(ColumnDef::text("name")),
        )
        .unwrap();
    builder
        .register(
            EntityClass::new("Dog")
                .inherits("Animal")
                .column(ColumnDef::text("breed"))
                .relationship("animal", Relationship::one_to_one("Animal")),
        )
        .unwrap();
    builder.finalize().unwrap()
}

/// Concrete-table hierarchy under an abstract `Person`.
pub fn people() -> Arc<SchemaRegistry> {
    let mut builder = SchemaRegistry::builder();
    builder
        .register(
            EntityClass::new("Person")
                .inheritance("concrete")
                .table("people")
                .abstract_class()
                .column(ColumnDef::integer("id").primary_key(true))
                .column(ColumnDef::text("name")),
        )
        .unwrap();
    builder
        .register(
            EntityClass::new("Vet")
                .inherits("Person")
                .column(ColumnDef::text("clinic")),
        )
        .unwrap();
    builder
        .register(EntityClass::new("Client").inherits("Person"))
        .unwrap();
    builder.finalize().unwrap()
}

/// `Node` rows that may point at another node.
pub fn nodes() -> Arc<SchemaRegistry> {
    let mut builder = SchemaRegistry::builder();
    builder
        .register(
            EntityClass::new("Node")
                .column(ColumnDef::integer("id").primary_key(true))
                .column(ColumnDef::text("label"))
                .column(ColumnDef::json("meta"))
                .relationship("next", Relationship::many_to_one("Node")),
        )
        .unwrap();
    builder.finalize().unwrap()
}

pub fn session(registry: &Arc<SchemaRegistry>) -> (Session<MockEngine>, MockEngine) {
    let engine = MockEngine::new();
    (Session::new(engine.clone(), Arc::clone(registry)), engine)
}
