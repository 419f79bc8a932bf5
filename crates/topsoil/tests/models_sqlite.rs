mod common;

use common::{Address, Atom, Food, Person, food, open_with_tables, person};
use std::sync::{Arc, Mutex};
use topsoil::prelude::*;
use topsoil::Value;

#[test]
fn created_rows_hold_type_defaults() {
    let db = open_with_tables();
    let atom = db.create::<Atom>().expect("create");

    assert!(atom.id().expect("id").greater_than(0));
    assert_eq!(atom.name().expect("name"), "");
    assert!(atom.mass().expect("mass").abs() < f64::EPSILON);
    assert_eq!(atom.charge().expect("charge"), None);
    assert_eq!(atom.partner().expect("partner"), None);
    assert!(atom.bonds().expect("bonds").is_empty());
}

#[test]
fn identities_are_never_reused() {
    let db = open_with_tables();
    let first = db.create::<Food>().expect("first");
    let first_id = first.id().expect("id");
    db.delete(&first).expect("delete");

    let second = db.create::<Food>().expect("second");
    assert!(second.id().expect("id").greater_than(first_id.get()));
}

#[test]
fn select_by_id_returns_the_shared_proxy() {
    let db = open_with_tables();
    let atom = db.create::<Atom>().expect("create");
    atom.set_name("Helium").expect("name");

    let found = db
        .select_by_id::<Atom>(atom.id().expect("id"))
        .expect("select")
        .expect("row exists");
    assert_eq!(found, atom);
    assert!(found.handle().ptr_eq(atom.handle()));
    assert_eq!(found.name().expect("name"), "Helium");

    let missing = db.select_by_id::<Atom>(Id::new(9999)).expect("select");
    assert!(missing.is_none());
}

#[test]
fn writes_are_visible_through_every_copy() {
    let db = open_with_tables();
    let atom = db.create::<Atom>().expect("create");
    let copy = atom.clone();

    atom.set_mass(4.0026).expect("mass");
    atom.set_charge(Some(2)).expect("charge");
    assert!((copy.mass().expect("mass") - 4.0026).abs() < 1e-9);
    assert_eq!(copy.charge().expect("charge"), Some(2));

    copy.set_charge(None).expect("clear charge");
    assert_eq!(atom.charge().expect("charge"), None);
    assert_eq!(atom.get(Atom::MASS).expect("typed get"), copy.mass().expect("mass"));
    atom.set(Atom::NAME, "He").expect("typed set");
    assert_eq!(copy.name().expect("name"), "He");
}

#[test]
fn delete_is_final_and_idempotent() {
    let db = open_with_tables();
    let atom = db.create::<Atom>().expect("create");
    let id = atom.id().expect("id");
    let copy = atom.clone();

    db.delete(&atom).expect("delete");
    assert!(db.select_by_id::<Atom>(id).expect("select").is_none());
    assert!(atom.is_stale());
    assert!(copy.is_stale());
    match copy.name() {
        Err(Error::StaleReference(e)) => {
            assert_eq!(e.reason, StaleReason::Deleted);
            assert_eq!(e.id, Some(id.get()));
        }
        other => panic!("expected a stale proxy, got {other:?}"),
    }

    db.delete(&atom).expect("second delete is a no-op");
    db.delete(&copy).expect("deleting a copy is a no-op too");
}

#[test]
fn delete_all_removes_each_row() {
    let db = open_with_tables();
    let atoms: Vec<Atom> = (0..3).map(|_| db.create::<Atom>().expect("atom")).collect();
    db.delete_all(&atoms).expect("delete all");
    assert!(db.select_all::<Atom>().expect("select").is_empty());
    assert!(atoms.iter().all(Atom::is_stale));
}

#[test]
fn commit_is_all_or_nothing() {
    let db = open_with_tables();
    let ada = person(&db, "Ada", 36);

    let result = ada.commit(|tx| {
        tx.set_first_name("Grace")?;
        tx.set_age(85)?;
        assert_eq!(tx.first_name()?, "Grace");
        Err(Error::Unsupported("changed my mind".to_string()))
    });
    assert!(matches!(result, Err(Error::Unsupported(_))));
    assert_eq!(ada.first_name().expect("name"), "Ada");
    assert_eq!(ada.age().expect("age"), 36);

    ada.commit(|tx| {
        tx.set_first_name("Grace")?;
        tx.set_age(85)
    })
    .expect("commit");
    assert_eq!(ada.first_name().expect("name"), "Grace");
    assert_eq!(ada.age().expect("age"), 85);
}

#[test]
fn commit_proxies_do_not_outlive_the_commit() {
    let db = open_with_tables();
    let apple = food(&db, "Apple", true, 52);

    let mut kept = None;
    apple
        .commit(|tx| {
            kept = Some(tx.clone());
            tx.set_healthy(false)
        })
        .expect("commit");
    let kept = kept.expect("proxy kept");
    assert!(matches!(kept.set_calories(999), Err(Error::Unsupported(_))));
    assert!(matches!(kept.calories(), Err(Error::Unsupported(_))));
    assert_eq!(apple.calories().expect("calories"), 52);
    assert!(!apple.healthy().expect("healthy"));

    let mut failed = None;
    let result = apple.commit(|tx| {
        failed = Some(tx.clone());
        Err(Error::Unsupported("abandoned".to_string()))
    });
    assert!(result.is_err());
    let failed = failed.expect("proxy kept");
    assert!(matches!(failed.set_calories(1), Err(Error::Unsupported(_))));
    assert_eq!(apple.calories().expect("calories"), 52);
}

#[test]
fn relations_cannot_change_inside_commit() {
    let db = open_with_tables();
    let ada = person(&db, "Ada", 36);
    let bob = person(&db, "Bob", 40);

    let err = ada
        .commit(|tx| tx.relate(Person::FRIENDS, &bob))
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert!(ada.friends().expect("friends").is_empty());
}

#[test]
fn references_follow_and_clear() {
    let db = open_with_tables();
    let home = db.create::<Address>().expect("address");
    home.set_city("Lyon").expect("city");
    let ada = person(&db, "Ada", 36);

    assert_eq!(ada.address().expect("address"), None);
    ada.set_address(Some(&home)).expect("set address");
    let followed = ada.address().expect("address").expect("has address");
    assert!(followed.handle().ptr_eq(home.handle()));
    assert_eq!(followed.city().expect("city"), "Lyon");
    assert_eq!(
        ada.get_reference(Person::ADDRESS).expect("typed reference"),
        Some(home.clone())
    );

    // Deleting the target nulls the reference.
    db.delete(&home).expect("delete address");
    assert_eq!(ada.address().expect("address"), None);

    let other = db.create::<Address>().expect("address");
    ada.set_reference(Person::ADDRESS, Some(&other)).expect("set");
    ada.set_address(None).expect("clear");
    assert_eq!(ada.address().expect("address"), None);
}

#[test]
fn self_references_are_allowed() {
    let db = open_with_tables();
    let a = db.create::<Atom>().expect("a");
    let b = db.create::<Atom>().expect("b");
    a.set_partner(Some(&b)).expect("partner");
    b.set_partner(Some(&a)).expect("partner");
    assert_eq!(a.partner().expect("partner"), Some(b.clone()));
    assert_eq!(b.partner().expect("partner"), Some(a));
}

#[test]
fn relation_membership() {
    let db = open_with_tables();
    let ada = person(&db, "Ada", 36);
    let bob = person(&db, "Bob", 40);
    let eve = person(&db, "Eve", 29);

    ada.relate(Person::FRIENDS, &bob).expect("relate");
    ada.relate(Person::FRIENDS, &bob).expect("relate twice");
    ada.relate(Person::FRIENDS, &eve).expect("relate");
    assert_eq!(ada.friends().expect("friends"), vec![bob.clone(), eve.clone()]);
    assert!(ada.is_related(Person::FRIENDS, &bob).expect("contains"));
    // Relations are directed.
    assert!(bob.friends().expect("friends").is_empty());

    ada.unrelate(Person::FRIENDS, &bob).expect("unrelate");
    assert_eq!(ada.related(Person::FRIENDS).expect("friends"), vec![eve.clone()]);

    ada.clear_relation(Person::FRIENDS).expect("clear");
    assert!(ada.friends().expect("friends").is_empty());
}

#[test]
fn delete_removes_join_rows_on_both_sides() {
    let db = open_with_tables();
    let ada = person(&db, "Ada", 36);
    let bob = person(&db, "Bob", 40);
    let home = db.create::<Address>().expect("address");

    ada.relate(Person::FRIENDS, &bob).expect("relate");
    bob.relate(Person::FRIENDS, &ada).expect("relate");
    ada.relate(Person::HOMES, &home).expect("relate home");

    db.delete(&bob).expect("delete bob");
    assert!(ada.friends().expect("friends").is_empty());

    db.delete(&home).expect("delete home");
    assert!(ada.homes().expect("homes").is_empty());

    let outcome = db.execute("DELETE FROM \"Person_friends_list_table\"");
    assert!(outcome.is_success());
    assert_eq!(outcome.changes, 0);
}

#[test]
fn detached_copies_insert_as_new_rows() {
    let db = open_with_tables();
    let carbon = db.create::<Atom>().expect("create");
    carbon.set_name("Carbon").expect("name");
    carbon.set_mass(12.011).expect("mass");

    let copy = carbon.clone_detached().expect("detach");
    assert!(matches!(copy.id(), Err(Error::Unbound { model: "Atom" })));
    assert_eq!(copy.name().expect("name"), "Carbon");
    copy.set_name("Carbon-13").expect("detached write");
    assert_eq!(carbon.name().expect("name"), "Carbon");
    assert!(copy.bonds().expect("bonds").is_empty());

    let inserted = db.insert(&copy).expect("insert");
    assert!(inserted.handle().ptr_eq(copy.handle()));
    assert_ne!(copy.id().expect("bound"), carbon.id().expect("id"));
    assert_eq!(inserted.name().expect("name"), "Carbon-13");
    assert!((inserted.mass().expect("mass") - 12.011).abs() < 1e-9);
    assert_eq!(db.select_all::<Atom>().expect("select").len(), 2);

    let err = db.insert(&inserted).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn fresh_detached_instances() {
    let db = open_with_tables();
    let home = db.detached::<Address>();
    home.set_city("Oslo").expect("city");
    home.set_zip(Some("0150".to_string())).expect("zip");

    let saved = db.insert(&home).expect("insert");
    let found = db
        .select_by_id::<Address>(saved.id().expect("id"))
        .expect("select")
        .expect("exists");
    assert_eq!(found.zip().expect("zip"), Some("0150".to_string()));
}

#[test]
fn describe_and_json() {
    let db = open_with_tables();
    let home = db.create::<Address>().expect("address");
    let ada = person(&db, "Ada", 36);
    ada.set_address(Some(&home)).expect("address");

    let id = ada.id().expect("id");
    let home_id = home.id().expect("id");
    assert_eq!(format!("{:?}", ada), format!("Person[id={}]", id));
    assert_eq!(
        ada.describe().expect("describe"),
        format!(
            "Person[id={}, first_name=\"Ada\", age=36, address=Address[id={}], friends=[], homes=[]]",
            id, home_id
        )
    );

    let json = ada.to_json().expect("json");
    assert_eq!(json["id"], id.get());
    assert_eq!(json["first_name"], "Ada");
    assert_eq!(json["age"], 36);
    assert_eq!(json["address"], home_id.get());
}

#[test]
fn listeners_observe_writes_from_any_copy() {
    let db = open_with_tables();
    let food = db.create::<Food>().expect("food");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    food.on_change(move |field, value| {
        sink.lock().unwrap().push((field.to_string(), value.clone()));
    });

    let same = db
        .select_by_id::<Food>(food.id().expect("id"))
        .expect("select")
        .expect("exists");
    same.set_calories(120).expect("write");
    same.commit(|tx| tx.set_healthy(true)).expect("commit");

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("calories".to_string(), Value::Int(120)),
            ("healthy".to_string(), Value::Bool(true)),
        ]
    );
}

#[test]
fn rows_removed_behind_the_proxy_read_as_deleted() {
    let db = open_with_tables();
    let food = db.create::<Food>().expect("food");
    let outcome = db.execute("DELETE FROM \"Food_table\"");
    assert!(outcome.is_success());
    assert_eq!(outcome.changes, 1);

    let id = food.id().expect("id");
    assert!(db.select_by_id::<Food>(id).expect("select").is_none());
    match food.calories() {
        Err(Error::StaleReference(e)) => assert_eq!(e.reason, StaleReason::Deleted),
        other => panic!("expected a stale proxy, got {other:?}"),
    }
    assert!(food.is_stale());
}

#[test]
fn raw_statement_failures_are_data() {
    let db = open_with_tables();
    let outcome = db.execute("SELEC nonsense");
    assert!(!outcome.is_success());
    assert!(outcome.error.as_deref().is_some_and(|e| e.contains("syntax")));

    let json = serde_json::to_value(&outcome).expect("serialize");
    assert_eq!(json["success"], false);
}

#[test]
fn proxy_writes_join_a_raw_transaction() {
    let db = open_with_tables();
    let apple = food(&db, "Apple", true, 52);

    assert!(db.execute("BEGIN").is_success());
    apple.set_calories(60).expect("write inside BEGIN");
    assert!(db.execute("ROLLBACK").is_success());
    assert_eq!(apple.calories().expect("calories"), 52);

    assert!(db.execute("BEGIN").is_success());
    apple.set_calories(61).expect("write inside BEGIN");
    let bacon = food(&db, "Bacon", false, 540);
    assert!(db.execute("COMMIT").is_success());
    assert_eq!(apple.calories().expect("calories"), 61);
    assert_eq!(bacon.calories().expect("calories"), 540);
}
