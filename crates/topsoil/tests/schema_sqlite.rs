mod common;

use common::{Address, Atom, Food, Person, open, schema_kind};
use topsoil::SchemaErrorKind;
use topsoil::prelude::*;

model! {
    struct Egg {
        SIZE => size, set_size: i32,
    }
    references {
        CHICKEN => chicken, set_chicken: Chicken,
    }
}

model! {
    struct Chicken {
        AGE => age, set_age: i32,
    }
    references {
        EGG => egg, set_egg: Egg,
    }
}

#[test]
fn table_sql_has_one_column_per_property_and_is_stable() {
    let db = open();
    db.create_tables_for(&[Food::info()]).expect("create");
    let first = db.sql_code_of_table::<Food>().expect("table sql");

    assert!(first.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
    assert!(first.contains("\"name\" TEXT NOT NULL"));
    assert!(first.contains("\"healthy\" BOOLEAN NOT NULL"));
    assert!(first.contains("\"calories\" INTEGER NOT NULL"));
    assert_eq!(first.matches(" NOT NULL").count(), 3);

    db.create_tables_for(&[Food::info()]).expect("create again");
    db.create_table_for::<Food>().expect("create once more");
    assert_eq!(db.sql_code_of_table::<Food>().expect("table sql"), first);
    assert_eq!(db.list_of_all_table_names().expect("names"), ["Food_table"]);
}

#[test]
fn optional_and_reference_columns() {
    let db = open();
    db.create_tables_for(&[Person::info(), Address::info()])
        .expect("create");

    let address = db.sql_code_of_table::<Address>().expect("address sql");
    assert!(address.contains("\"zip\" TEXT,") || address.contains("\"zip\" TEXT\n"));
    assert!(!address.contains("\"zip\" TEXT NOT NULL"));

    let person = db.sql_code_of_table::<Person>().expect("person sql");
    assert!(person.contains(
        "\"fk_address_id\" INTEGER REFERENCES \"Address_table\"(\"id\") ON DELETE SET NULL"
    ));
    // Relations live in their own tables.
    assert!(!person.contains("friends"));
}

#[test]
fn relation_tables_are_created_and_listed() {
    let db = open();
    db.create_tables_for(&[Atom::info(), Address::info(), Person::info()])
        .expect("create");

    assert_eq!(
        db.list_of_all_table_names().expect("names"),
        [
            "Address_table",
            "Atom_bonds_list_table",
            "Atom_table",
            "Person_friends_list_table",
            "Person_homes_list_table",
            "Person_table",
        ]
    );
}

#[test]
fn dangling_targets_are_rejected() {
    let db = open();
    let err = db.create_tables_for(&[Person::info()]).unwrap_err();
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::MissingTarget));
    assert!(db.list_of_all_table_names().expect("names").is_empty());

    // A target registered earlier satisfies the reference.
    db.create_tables_for(&[Address::info()]).expect("address");
    db.create_tables_for(&[Person::info()]).expect("person");
}

#[test]
fn reference_cycles_are_rejected() {
    let db = open();
    let err = db
        .create_tables_for(&[Egg::info(), Chicken::info()])
        .unwrap_err();
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::Cycle));
    assert!(db.list_of_all_table_names().expect("names").is_empty());
}

#[test]
fn unregistered_models_are_rejected() {
    let db = open();
    let err = db.create::<Food>().unwrap_err();
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::NotRegistered));

    let err = db.sql_code_of_table::<Food>().unwrap_err();
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::TableNotFound));
}

#[test]
fn dropping_a_table_invalidates_its_proxies() {
    let db = open();
    db.create_tables_for(&[Address::info(), Person::info()])
        .expect("create");
    let home = db.create::<Address>().expect("address");
    let ada = db.create::<Person>().expect("person");

    db.drop_table::<Person>().expect("drop");
    assert_eq!(
        db.list_of_all_table_names().expect("names"),
        ["Address_table"]
    );
    match ada.age() {
        Err(Error::StaleReference(e)) => assert_eq!(e.reason, StaleReason::Dropped),
        other => panic!("expected a stale proxy, got {other:?}"),
    }
    assert!(home.city().is_ok());

    let err = db.create::<Person>().unwrap_err();
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::NotRegistered));
}

#[test]
fn drop_all_tables_empties_the_store() {
    let db = open();
    db.create_tables_for(&[Atom::info(), Food::info()])
        .expect("create");
    let hydrogen = db.create::<Atom>().expect("atom");

    db.drop_all_tables().expect("drop all");
    assert!(db.list_of_all_table_names().expect("names").is_empty());
    assert!(hydrogen.is_stale());

    db.create_tables_for(&[Food::info()]).expect("recreate");
    assert_eq!(db.select_all::<Food>().expect("select").len(), 0);
}

#[test]
fn drop_tables_for_removes_relation_tables() {
    let db = open();
    db.create_tables_for(&[Atom::info(), Food::info()])
        .expect("create");
    db.drop_tables_for(&[Atom::info()]).expect("drop");
    assert_eq!(db.list_of_all_table_names().expect("names"), ["Food_table"]);
}

#[test]
fn file_databases_keep_their_rows() {
    let dir = tempfile::tempdir().expect("temp dir");
    let location = dir.path().join("pantry");

    {
        let db = DataBase::at(&location).expect("open");
        assert!(db.file().ends_with("sqlite.db"));
        db.create_tables_for(&[Food::info()]).expect("create");
        let bread = db.create::<Food>().expect("food");
        bread.set_name("Bread").expect("name");
        db.close().expect("close");
    }
    assert!(location.join("sqlite.db").is_file());

    let db = DataBase::at(&location).expect("reopen");
    db.create_tables_for(&[Food::info()]).expect("existing tables");
    let foods = db.select_all::<Food>().expect("select");
    assert_eq!(foods.len(), 1);
    assert_eq!(foods[0].name().expect("name"), "Bread");
}
