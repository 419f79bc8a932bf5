#![allow(dead_code)]

use topsoil::prelude::*;

model! {
    /// A chemical element with an optional bonding partner.
    pub struct Atom {
        NAME => name, set_name: String,
        MASS => mass, set_mass: f64,
        CHARGE => charge, set_charge: Option<i32>,
    }
    references {
        PARTNER => partner, set_partner: Atom,
    }
    relations {
        BONDS => bonds: Atom,
    }
}

model! {
    pub struct Address {
        CITY => city, set_city: String,
        ZIP => zip, set_zip: Option<String>,
    }
}

model! {
    pub struct Person {
        FIRST_NAME => first_name, set_first_name: String,
        AGE => age, set_age: i32,
    }
    references {
        ADDRESS => address, set_address: Address,
    }
    relations {
        FRIENDS => friends: Person,
        HOMES => homes: Address,
    }
}

model! {
    pub struct Food {
        NAME => name, set_name: String,
        HEALTHY => healthy, set_healthy: bool,
        CALORIES => calories, set_calories: i32,
    }
}

pub fn open() -> DataBase {
    DataBase::in_memory().expect("open in-memory database")
}

/// A database with every test model registered.
pub fn open_with_tables() -> DataBase {
    let db = open();
    db.create_tables_for(&[
        Atom::info(),
        Address::info(),
        Person::info(),
        Food::info(),
    ])
    .expect("create tables");
    db
}

pub fn food(db: &DataBase, name: &str, healthy: bool, calories: i32) -> Food {
    let food = db.create::<Food>().expect("create food");
    food.commit(|tx| {
        tx.set_name(name)?;
        tx.set_healthy(healthy)?;
        tx.set_calories(calories)
    })
    .expect("fill food");
    food
}

/// Five rows where left-to-right folding and SQL precedence disagree.
pub fn pantry(db: &DataBase) -> Vec<Food> {
    vec![
        food(db, "Apple", true, 52),
        food(db, "Bacon", false, 540),
        food(db, "Cake", false, 350),
        food(db, "Dates", true, 280),
        food(db, "Granola", true, 470),
    ]
}

pub fn person(db: &DataBase, name: &str, age: i32) -> Person {
    let person = db.create::<Person>().expect("create person");
    person.set_first_name(name).expect("set name");
    person.set_age(age).expect("set age");
    person
}

pub fn names(foods: &[Food]) -> Vec<String> {
    foods.iter().map(|f| f.name().expect("read name")).collect()
}

pub fn schema_kind(err: &Error) -> Option<topsoil::SchemaErrorKind> {
    match err {
        Error::Schema(e) => Some(e.kind),
        _ => None,
    }
}
