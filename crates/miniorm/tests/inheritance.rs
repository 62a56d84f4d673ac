mod common;

use common::{animals, employees, people, row, session};
use miniorm::prelude::*;

#[test]
fn single_table_round_trip_restores_the_subclass() {
    let registry = employees();
    let (mut writer, engine) = session(&registry);
    let manager = writer.new_entity("Manager").unwrap();
    manager.set("name", "Bo").unwrap();
    manager.set("reports", 3).unwrap();
    writer.add(&manager).unwrap();
    writer.commit().unwrap();

    let (sql, params) = engine.statements_with_params().remove(0);
    assert!(sql.starts_with("INSERT INTO \"employees\""));
    assert!(sql.contains("\"type\""));
    assert!(params.contains(&Value::Text("Manager".into())));

    let (mut reader, engine) = session(&registry);
    engine.respond(
        "FROM \"employees\"",
        vec![
            row(&[
                ("employees#id", Value::BigInt(1)),
                ("employees#name", "Bo".into()),
                ("employees#type", "Manager".into()),
                ("employees#reports", Value::Int(3)),
            ]),
            row(&[
                ("employees#id", Value::BigInt(2)),
                ("employees#name", "Cy".into()),
                ("employees#type", "Employee".into()),
                ("employees#reports", Value::Null),
            ]),
        ],
    );
    let staff = reader.query("Employee").unwrap().all().unwrap();

    assert_eq!(staff.len(), 2);
    assert_eq!(staff[0].class_name(), "Manager");
    assert_eq!(staff[0].get("reports"), Some(Value::Int(3)));
    assert_eq!(staff[1].class_name(), "Employee");
    assert_eq!(staff[1].get("reports"), None);
}

#[test]
fn single_table_subclass_query_filters_on_the_discriminator() {
    let registry = employees();
    let (mut session, _) = session(&registry);

    let stmt = session.query("Manager").unwrap().statement().unwrap().unwrap();

    assert!(stmt.sql.contains("\"employees\".\"type\""));
    assert!(stmt.params.contains(&Value::Text("Manager".into())));
}

#[test]
fn joined_insert_carries_the_generated_key() {
    let registry = animals();
    let (mut session, engine) = session(&registry);
    let dog = session.new_entity("Dog").unwrap();
    dog.set("name", "Rex").unwrap();
    dog.set("breed", "lab").unwrap();

    session.add(&dog).unwrap();
    session.flush().unwrap();

    let statements = engine.statements_with_params();
    assert_eq!(statements.len(), 2);
    assert_eq!(
        statements[0].0,
        "INSERT INTO \"animals\" (\"name\") VALUES (?)"
    );
    assert_eq!(
        statements[1].0,
        "INSERT INTO \"dogs\" (\"id\", \"breed\") VALUES (?, ?)"
    );
    assert_eq!(
        statements[1].1,
        vec![Value::BigInt(1), Value::Text("lab".into())]
    );
    assert_eq!(dog.pk(), Some(Value::BigInt(1)));
}

#[test]
fn joined_update_and_delete_touch_each_table() {
    let registry = animals();
    let (mut session, engine) = session(&registry);
    engine.respond(
        "FROM \"animals\"",
        vec![row(&[
            ("animals#id", Value::BigInt(4)),
            ("animals#name", "Rex".into()),
            ("dogs#breed", "lab".into()),
            ("dogs#id", Value::BigInt(4)),
        ])],
    );
    let dog = session.get("Dog", 4).unwrap().unwrap();
    engine.clear_log();

    dog.set("breed", "pug").unwrap();
    session.flush().unwrap();
    assert_eq!(
        engine.statements(),
        vec!["UPDATE \"dogs\" SET \"breed\" = ? WHERE \"id\" = ?".to_string()]
    );

    engine.clear_log();
    session.delete(&dog).unwrap();
    session.flush().unwrap();
    assert_eq!(
        engine.statements(),
        vec![
            "DELETE FROM \"dogs\" WHERE \"id\" = ?".to_string(),
            "DELETE FROM \"animals\" WHERE \"id\" = ?".to_string(),
        ]
    );
}

#[test]
fn joined_query_resolves_each_row_to_its_class() {
    let registry = animals();
    let (mut session, engine) = session(&registry);
    engine.respond(
        "FROM \"animals\"",
        vec![
            row(&[
                ("animals#id", Value::BigInt(1)),
                ("animals#name", "Rex".into()),
                ("dogs#breed", "lab".into()),
                ("dogs#id", Value::BigInt(1)),
            ]),
            row(&[
                ("animals#id", Value::BigInt(2)),
                ("animals#name", "Tweety".into()),
                ("dogs#breed", Value::Null),
                ("dogs#id", Value::Null),
            ]),
        ],
    );

    let all = session.query("Animal").unwrap().all().unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(all[0].class_name(), "Dog");
    assert_eq!(all[0].get("breed"), Some(Value::Text("lab".into())));
    assert_eq!(all[1].class_name(), "Animal");

    // Identity is shared across the hierarchy.
    let via_base = session.get("Animal", 1).unwrap().unwrap();
    assert!(via_base.ptr_eq(&all[0]));
    assert!(session.get("Dog", 2).unwrap().is_none());
}

#[test]
fn concrete_union_hydrates_every_subclass() {
    let registry = people();
    let (mut session, engine) = session(&registry);
    engine.respond(
        "UNION ALL",
        vec![
            row(&[
                ("poly#id", Value::BigInt(1)),
                ("poly#name", "Al".into()),
                ("poly#clinic", "North".into()),
                ("poly#_concrete_type", "Vet".into()),
            ]),
            row(&[
                ("poly#id", Value::BigInt(1)),
                ("poly#name", "Cy".into()),
                ("poly#clinic", Value::Null),
                ("poly#_concrete_type", "Client".into()),
            ]),
        ],
    );

    let everyone = session.query("Person").unwrap().all().unwrap();

    // Same key in different tables: two distinct identities.
    assert_eq!(everyone.len(), 2);
    assert_eq!(everyone[0].class_name(), "Vet");
    assert_eq!(everyone[0].get("clinic"), Some(Value::Text("North".into())));
    assert_eq!(everyone[1].class_name(), "Client");
    assert!(!everyone[0].ptr_eq(&everyone[1]));
}

#[test]
fn concrete_subclass_writes_its_own_table() {
    let registry = people();
    let (mut session, engine) = session(&registry);

    assert!(matches!(
        session.new_entity("Person"),
        Err(Error::InvalidState(_))
    ));

    let vet = session.new_entity("Vet").unwrap();
    vet.set("name", "Al").unwrap();
    vet.set("clinic", "North").unwrap();
    session.add(&vet).unwrap();
    session.flush().unwrap();

    assert_eq!(engine.statements().len(), 1);
    assert!(engine.statements()[0].starts_with("INSERT INTO \"vets\""));
    assert_eq!(vet.pk(), Some(Value::BigInt(1)));
}
