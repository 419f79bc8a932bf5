//! CREATE TABLE statement builders for model and relation tables.

use topsoil_core::field::reference_column;
use topsoil_core::{Error, FieldInfo, FieldKind, ModelInfo, Result, quote_ident};

/// Builder for a model's own table.
///
/// Columns are `id`, then one column per scalar property, then one
/// `fk_<field>_id` column per reference property.
#[derive(Debug, Clone, Copy)]
pub struct CreateTable {
    info: &'static ModelInfo,
    if_not_exists: bool,
}

impl CreateTable {
    pub fn new(info: &'static ModelInfo) -> Self {
        Self {
            info,
            if_not_exists: false,
        }
    }

    /// Add IF NOT EXISTS clause.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Build the CREATE TABLE SQL.
    pub fn build(&self) -> String {
        let mut sql = String::from("CREATE TABLE ");
        if self.if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&quote_ident(&self.info.table_name()));
        sql.push_str(" (\n");

        let mut column_defs = vec![format!("  {} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident("id"))];
        // Scalars first, references last.
        for field in self.info.column_fields().filter(|f| f.is_scalar()) {
            column_defs.push(column_definition(field));
        }
        for field in self.info.column_fields().filter(|f| f.is_reference()) {
            column_defs.push(column_definition(field));
        }

        sql.push_str(&column_defs.join(",\n"));
        sql.push_str("\n)");
        sql
    }
}

fn column_definition(field: &FieldInfo) -> String {
    match field.kind {
        FieldKind::Scalar {
            sql_type, nullable, ..
        } => {
            let mut def = format!("  {} {}", quote_ident(field.name), sql_type.sql_name());
            if !nullable {
                def.push_str(" NOT NULL");
            }
            def
        }
        FieldKind::Reference { target } => format!(
            "  {} INTEGER REFERENCES {}({}) ON DELETE SET NULL",
            quote_ident(&reference_column(field.name)),
            quote_ident(&target().table_name()),
            quote_ident("id"),
        ),
        FieldKind::Relation { .. } => String::new(),
    }
}

/// The join table behind one relation property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTable {
    /// `<Model>_<field>_list_table`
    pub table: String,
    /// Table of the model owning the property
    pub owner_table: String,
    /// Table of the related model
    pub other_table: String,
    /// `fk_self_<OwnerTable>_id`
    pub self_column: String,
    /// `fk_<OtherTable>_id`
    pub other_column: String,
}

impl RelationTable {
    /// Describe the join table of `field` on `owner`.
    pub fn of(owner: &ModelInfo, field: &FieldInfo) -> Result<Self> {
        let FieldKind::Relation { target } = field.kind else {
            return Err(Error::Unsupported(format!(
                "{}.{} is not a relation property",
                owner.name, field.name
            )));
        };
        Ok(Self::between(owner, field.name, target()))
    }

    /// Describe the join table of relation `field` from `owner` to `other`.
    pub fn between(owner: &ModelInfo, field: &str, other: &ModelInfo) -> Self {
        let owner_table = owner.table_name();
        let other_table = other.table_name();
        Self {
            table: format!("{}_{}_list_table", owner.name, field),
            self_column: format!("fk_self_{}_id", owner_table),
            other_column: format!("fk_{}_id", other_table),
            owner_table,
            other_table,
        }
    }

    /// Build the CREATE TABLE SQL.
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE {} (\n  {} INTEGER PRIMARY KEY AUTOINCREMENT,\n  {} INTEGER NOT NULL,\n  {} INTEGER NOT NULL,\n  FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE,\n  FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE\n)",
            quote_ident(&self.table),
            quote_ident("id"),
            quote_ident(&self.self_column),
            quote_ident(&self.other_column),
            quote_ident(&self.self_column),
            quote_ident(&self.owner_table),
            quote_ident("id"),
            quote_ident(&self.other_column),
            quote_ident(&self.other_table),
            quote_ident("id"),
        )
    }
}

/// All join tables of a model, in declaration order.
pub fn relation_tables(info: &ModelInfo) -> Result<Vec<RelationTable>> {
    info.relation_fields()
        .map(|field| RelationTable::of(info, field))
        .collect()
}

/// Generate DROP TABLE SQL.
pub fn drop_table_sql(table_name: &str, if_exists: bool) -> String {
    if if_exists {
        format!("DROP TABLE IF EXISTS {}", quote_ident(table_name))
    } else {
        format!("DROP TABLE {}", quote_ident(table_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topsoil_core::{SqlType, Value};

    static ADDRESS: ModelInfo = ModelInfo {
        name: "Address",
        fields: &[FieldInfo::scalar("city", SqlType::Text, false, || {
            Value::Text(String::new())
        })],
    };

    static PERSON: ModelInfo = ModelInfo {
        name: "Person",
        fields: &[
            FieldInfo::relation("friends", person),
            FieldInfo::reference("address", address),
            FieldInfo::scalar("name", SqlType::Text, false, || Value::Text(String::new())),
            FieldInfo::scalar("nickname", SqlType::Text, true, || Value::Null),
            FieldInfo::scalar("age", SqlType::Integer, false, || Value::Int(0)),
        ],
    };

    fn address() -> &'static ModelInfo {
        &ADDRESS
    }

    fn person() -> &'static ModelInfo {
        &PERSON
    }

    #[test]
    fn test_create_table_columns() {
        let sql = CreateTable::new(&PERSON).build();
        assert_eq!(
            sql,
            "CREATE TABLE \"Person_table\" (\n  \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \"name\" TEXT NOT NULL,\n  \"nickname\" TEXT,\n  \"age\" INTEGER NOT NULL,\n  \"fk_address_id\" INTEGER REFERENCES \"Address_table\"(\"id\") ON DELETE SET NULL\n)"
        );
    }

    #[test]
    fn test_create_table_if_not_exists() {
        let sql = CreateTable::new(&ADDRESS).if_not_exists().build();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"Address_table\""));
        assert!(sql.contains("\"city\" TEXT NOT NULL"));
    }

    #[test]
    fn test_relation_table() {
        let tables = relation_tables(&PERSON).unwrap();
        assert_eq!(tables.len(), 1);
        let friends = &tables[0];
        assert_eq!(friends.table, "Person_friends_list_table");
        assert_eq!(friends.self_column, "fk_self_Person_table_id");
        assert_eq!(friends.other_column, "fk_Person_table_id");

        let sql = friends.create_sql();
        assert!(sql.starts_with("CREATE TABLE \"Person_friends_list_table\""));
        assert!(sql.contains("\"fk_self_Person_table_id\" INTEGER NOT NULL"));
        assert!(sql.contains(
            "FOREIGN KEY (\"fk_Person_table_id\") REFERENCES \"Person_table\"(\"id\")"
        ));
    }

    #[test]
    fn test_relation_table_rejects_scalars() {
        let name = PERSON.field("name").unwrap();
        assert!(RelationTable::of(&PERSON, name).is_err());
    }

    #[test]
    fn test_drop_table_sql() {
        assert_eq!(drop_table_sql("users", true), "DROP TABLE IF EXISTS \"users\"");
        assert_eq!(drop_table_sql("heroes", false), "DROP TABLE \"heroes\"");
        assert_eq!(
            drop_table_sql("my\"table", true),
            "DROP TABLE IF EXISTS \"my\"\"table\""
        );
    }
}
