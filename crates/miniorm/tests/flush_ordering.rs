mod common;

use common::{nodes, pets, row, session};
use miniorm::prelude::*;

fn owner_row(id: i64, name: &str) -> Row {
    row(&[
        ("owners#id", Value::BigInt(id)),
        ("owners#name", name.into()),
        ("owners#phone", Value::Null),
    ])
}

fn pet_row(id: i64, name: &str, owner: i64) -> Row {
    row(&[
        ("pets#id", Value::BigInt(id)),
        ("pets#name", name.into()),
        ("pets#owner_id", Value::BigInt(owner)),
    ])
}

#[test]
fn unchanged_instance_issues_no_update() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    engine.respond("FROM \"owners\"", vec![owner_row(1, "Ann")]);
    let owner = session.get("Owner", 1).unwrap().unwrap();
    engine.clear_log();

    owner.set("name", "Ann").unwrap();
    session.flush().unwrap();

    assert_eq!(engine.count("UPDATE"), 0);
    assert!(engine.transactions().is_empty());
    assert!(!session.is_modified(&owner));
}

#[test]
fn update_touches_only_changed_columns() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    engine.respond("FROM \"owners\"", vec![owner_row(1, "Ann")]);
    let owner = session.get("Owner", 1).unwrap().unwrap();
    engine.clear_log();

    owner.set("name", "Bea").unwrap();
    assert!(session.is_modified(&owner));
    session.flush().unwrap();

    let updates: Vec<_> = engine
        .statements_with_params()
        .into_iter()
        .filter(|(sql, _)| sql.starts_with("UPDATE"))
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0].0,
        "UPDATE \"owners\" SET \"name\" = ? WHERE \"id\" = ?"
    );
    assert_eq!(
        updates[0].1,
        vec![Value::Text("Bea".into()), Value::BigInt(1)]
    );

    // The snapshot was retaken, so a second flush is a no-op.
    engine.clear_log();
    session.flush().unwrap();
    assert!(engine.statements().is_empty());
}

#[test]
fn cascade_add_inserts_the_referenced_row_first() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    let owner = session.new_entity("Owner").unwrap();
    owner.set("name", "Ann").unwrap();
    let pet = session.new_entity("Pet").unwrap();
    pet.set("name", "Rex").unwrap();
    pet.set_related("owner", Some(&owner)).unwrap();

    session.add(&pet).unwrap();
    assert_eq!(owner.state(), ObjectState::Pending);
    session.flush().unwrap();

    let statements = engine.statements_with_params();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].0.starts_with("INSERT INTO \"owners\""));
    assert!(statements[1].0.starts_with("INSERT INTO \"pets\""));
    assert_eq!(
        statements[1].1,
        vec![Value::Text("Rex".into()), Value::BigInt(1)]
    );
    assert_eq!(pet.get("owner_id"), owner.pk());
    assert_eq!(engine.transactions(), vec!["BEGIN"]);
    assert!(session.in_transaction());
}

#[test]
fn collection_members_get_the_parent_key() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    let owner = session.new_entity("Owner").unwrap();
    owner.set("name", "Ann").unwrap();
    let rex = session.new_entity("Pet").unwrap();
    rex.set("name", "Rex").unwrap();
    let tom = session.new_entity("Pet").unwrap();
    tom.set("name", "Tom").unwrap();
    owner.set_collection("pets", vec![rex.clone(), tom.clone()]).unwrap();

    session.add(&owner).unwrap();
    session.flush().unwrap();

    assert_eq!(engine.count("INSERT INTO \"owners\""), 1);
    assert_eq!(engine.count("INSERT INTO \"pets\""), 2);
    assert!(engine.statements()[0].starts_with("INSERT INTO \"owners\""));
    assert_eq!(rex.get("owner_id"), owner.pk());
    assert_eq!(tom.get("owner_id"), owner.pk());
    assert!(rex.related("owner").and_then(Related::into_one).is_some_and(|o| o.ptr_eq(&owner)));
}

#[test]
fn reference_cycle_aborts_before_any_sql() {
    let registry = nodes();
    let (mut session, engine) = session(&registry);
    let a = session.new_entity("Node").unwrap();
    let b = session.new_entity("Node").unwrap();
    a.set_related("next", Some(&b)).unwrap();
    b.set_related("next", Some(&a)).unwrap();
    session.add(&a).unwrap();

    let err = session.flush().unwrap_err();

    match err {
        Error::Cycle(cycle) => assert_eq!(cycle.entities.len(), 2),
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert!(engine.statements().is_empty());
    assert!(engine.transactions().is_empty());
    assert_eq!(session.pending_counts().inserts, 2);
    assert_eq!(a.state(), ObjectState::Pending);

    // Breaking the cycle lets the same work go through.
    b.set_related("next", None).unwrap();
    session.flush().unwrap();
    assert_eq!(engine.count("INSERT INTO \"nodes\""), 2);
    assert_eq!(a.get("next_id"), b.pk());
    assert_eq!(b.get("next_id"), Some(Value::Null));
}

#[test]
fn second_flush_writes_no_association_rows() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    let pet = session.new_entity("Pet").unwrap();
    pet.set("name", "Rex").unwrap();
    let toy = session.new_entity("Toy").unwrap();
    toy.set("label", "ball").unwrap();
    pet.push_related("toys", &toy).unwrap();

    session.add(&pet).unwrap();
    session.flush().unwrap();
    assert_eq!(engine.count("INSERT INTO \"pets_toys\""), 1);
    let link = engine
        .statements_with_params()
        .into_iter()
        .find(|(sql, _)| sql.starts_with("INSERT INTO \"pets_toys\""))
        .unwrap();
    assert_eq!(
        link.0,
        "INSERT INTO \"pets_toys\" (\"pet_id\", \"toy_id\") VALUES (?, ?)"
    );
    assert_eq!(link.1, vec![pet.pk().unwrap(), toy.pk().unwrap()]);

    engine.clear_log();
    session.flush().unwrap();
    assert!(engine.statements().is_empty());

    pet.set_collection("toys", Vec::new()).unwrap();
    session.flush().unwrap();
    assert_eq!(
        engine.statements(),
        vec!["DELETE FROM \"pets_toys\" WHERE \"pet_id\" = ? AND \"toy_id\" = ?".to_string()]
    );
}

#[test]
fn linking_a_new_member_to_a_loaded_collection() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    engine.respond("FROM \"pets\"", vec![pet_row(5, "Rex", 1)]);
    engine.respond(
        "FROM \"toys\"",
        vec![row(&[("toys#id", Value::BigInt(7)), ("toys#label", "bone".into())])],
    );
    let pet = session.get("Pet", 5).unwrap().unwrap();
    let toys = session.load(&pet, "toys").unwrap();
    assert_eq!(toys.as_many().len(), 1);
    engine.clear_log();

    let ball = session.new_entity("Toy").unwrap();
    ball.set("label", "ball").unwrap();
    pet.push_related("toys", &ball).unwrap();
    session.flush().unwrap();

    assert_eq!(engine.count("INSERT INTO \"toys\""), 1);
    assert_eq!(engine.count("INSERT INTO \"pets_toys\""), 1);
    assert_eq!(engine.count("DELETE"), 0);
    assert_eq!(ball.state(), ObjectState::Persistent);
}

#[test]
fn failed_flush_restores_every_instance() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    let owner = session.new_entity("Owner").unwrap();
    owner.set("name", "Ann").unwrap();
    let pet = session.new_entity("Pet").unwrap();
    pet.set("name", "Rex").unwrap();
    pet.set_related("owner", Some(&owner)).unwrap();
    session.add(&pet).unwrap();
    engine.fail_on("INSERT INTO \"pets\"");

    let err = session.flush().unwrap_err();

    assert!(matches!(err, Error::Flush(_)));
    assert!(err.is_constraint_violation());
    assert_eq!(err.sql().map(|s| s.starts_with("INSERT INTO \"pets\"")), Some(true));
    assert_eq!(engine.transactions(), vec!["BEGIN", "ROLLBACK"]);
    for entity in [&owner, &pet] {
        assert_eq!(entity.state(), ObjectState::Transient);
        assert_eq!(entity.pk(), None);
        assert!(!session.contains(entity));
    }
    assert_eq!(session.tracked_count(), 0);
    assert_eq!(session.pending_counts().total(), 0);
    assert!(!session.in_transaction());

    // The same graph can be added again once the conflict is gone.
    engine.clear_failure();
    engine.clear_log();
    session.add(&pet).unwrap();
    session.commit().unwrap();
    assert_eq!(engine.count("INSERT"), 2);
    assert_eq!(engine.transactions(), vec!["BEGIN", "COMMIT"]);
}

#[test]
fn unique_violation_on_first_insert() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    let owner = session.new_entity("Owner").unwrap();
    owner.set("name", "Ann").unwrap();
    session.add(&owner).unwrap();
    engine.fail_on("INSERT INTO \"owners\"");

    let err = session.commit().unwrap_err();

    assert!(err.is_constraint_violation());
    assert_eq!(owner.pk(), None);
    assert_eq!(owner.state(), ObjectState::Transient);
    assert!(engine.transactions().contains(&"ROLLBACK"));
    assert!(!engine.transactions().contains(&"COMMIT"));
}

#[test]
fn delete_cascades_to_dependents_first() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    engine.respond("FROM \"owners\"", vec![owner_row(1, "Ann")]);
    engine.respond("FROM \"pets\"", vec![pet_row(5, "Rex", 1)]);
    let owner = session.get("Owner", 1).unwrap().unwrap();

    session.delete(&owner).unwrap();
    let pet = session.get("Pet", 5);
    assert!(pet.unwrap().is_none(), "cascaded pet is already deleted");
    engine.clear_log();
    session.flush().unwrap();

    let statements = engine.statements();
    assert_eq!(
        statements,
        vec![
            "DELETE FROM \"pets_toys\" WHERE \"pet_id\" = ?".to_string(),
            "DELETE FROM \"pets\" WHERE \"id\" = ?".to_string(),
            "DELETE FROM \"owners\" WHERE \"id\" = ?".to_string(),
        ]
    );
    assert_eq!(owner.state(), ObjectState::Deleted);
    assert!(!session.contains(&owner));
}

#[test]
fn updates_and_deletes_keep_queue_order() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    engine.respond(
        "FROM \"owners\"",
        vec![owner_row(1, "Ann"), owner_row(2, "Bo")],
    );
    let ann = session.get("Owner", 1).unwrap().unwrap();
    let bo = session.get("Owner", 2).unwrap().unwrap();

    // Bo takes over Ann's number only after Ann's row is gone.
    session.delete(&ann).unwrap();
    bo.set("phone", "555").unwrap();
    session.update(&bo).unwrap();
    engine.clear_log();
    session.flush().unwrap();

    assert_eq!(
        engine.statements(),
        vec![
            "DELETE FROM \"owners\" WHERE \"id\" = ?".to_string(),
            "UPDATE \"owners\" SET \"phone\" = ? WHERE \"id\" = ?".to_string(),
        ]
    );
}

#[test]
fn inserts_run_before_queued_updates_and_deletes() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    engine.respond(
        "FROM \"owners\"",
        vec![owner_row(5, "Ann"), owner_row(6, "Bo")],
    );
    let ann = session.get("Owner", 5).unwrap().unwrap();
    let bo = session.get("Owner", 6).unwrap().unwrap();

    bo.set("phone", "555").unwrap();
    session.update(&bo).unwrap();
    session.delete(&ann).unwrap();
    let cy = session.new_entity("Owner").unwrap();
    cy.set("name", "Cy").unwrap();
    session.add(&cy).unwrap();
    engine.clear_log();
    session.flush().unwrap();

    let statements = engine.statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].starts_with("INSERT INTO \"owners\""));
    assert!(statements[1].starts_with("UPDATE \"owners\""));
    assert!(statements[2].starts_with("DELETE FROM \"owners\""));
}

#[test]
fn rollback_after_flush_reverts_inserts_and_deletes() {
    let registry = pets();
    let (mut session, engine) = session(&registry);
    engine.respond("FROM \"owners\"", vec![owner_row(1, "Ann")]);
    let ann = session.get("Owner", 1).unwrap().unwrap();
    let bo = session.new_entity("Owner").unwrap();
    bo.set("name", "Bo").unwrap();
    session.add(&bo).unwrap();
    session.delete(&ann).unwrap();
    session.flush().unwrap();
    assert!(bo.pk().is_some());

    session.rollback().unwrap();

    assert_eq!(engine.transactions(), vec!["BEGIN", "ROLLBACK"]);
    assert_eq!(bo.state(), ObjectState::Transient);
    assert_eq!(bo.pk(), None);
    assert_eq!(ann.state(), ObjectState::Persistent);
    assert_eq!(session.tracked_count(), 0);
}

#[test]
fn json_columns_are_written_as_parameters() {
    let registry = nodes();
    let (mut session, engine) = session(&registry);
    let node = session.new_entity("Node").unwrap();
    node.set("label", "root").unwrap();
    node.set("meta", serde_json::json!({"depth": 0, "tags": ["a", "b"]}))
        .unwrap();

    session.add(&node).unwrap();
    session.flush().unwrap();

    let (sql, params) = engine.statements_with_params().remove(0);
    assert_eq!(
        sql,
        "INSERT INTO \"nodes\" (\"label\", \"meta\", \"next_id\") VALUES (?, ?, ?)"
    );
    assert_eq!(
        params[1],
        Value::Json(serde_json::json!({"depth": 0, "tags": ["a", "b"]}))
    );
    assert_eq!(params[2], Value::Null);
}
