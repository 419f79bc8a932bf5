//! Field and column definitions.

use crate::model::ModelInfo;
use crate::types::SqlType;
use crate::value::Value;
use std::borrow::Cow;

/// What kind of storage a model property maps to.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// A plain column holding a scalar value.
    Scalar {
        sql_type: SqlType,
        nullable: bool,
        default: fn() -> Value,
    },
    /// A nullable foreign key column (`fk_<field>_id`) pointing at one row
    /// of another model.
    Reference { target: fn() -> &'static ModelInfo },
    /// A set of related rows, stored in a dedicated join table.
    Relation { target: fn() -> &'static ModelInfo },
}

/// Metadata about a model property.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    /// Property name, also the column name for scalars
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldInfo {
    pub const fn scalar(
        name: &'static str,
        sql_type: SqlType,
        nullable: bool,
        default: fn() -> Value,
    ) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar {
                sql_type,
                nullable,
                default,
            },
        }
    }

    pub const fn reference(name: &'static str, target: fn() -> &'static ModelInfo) -> Self {
        Self {
            name,
            kind: FieldKind::Reference { target },
        }
    }

    pub const fn relation(name: &'static str, target: fn() -> &'static ModelInfo) -> Self {
        Self {
            name,
            kind: FieldKind::Relation { target },
        }
    }

    pub const fn is_scalar(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar { .. })
    }

    pub const fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference { .. })
    }

    pub const fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation { .. })
    }

    /// The column this property occupies in its model's table.
    ///
    /// Relation properties live in a join table and have no column.
    pub fn column_name(&self) -> Option<Cow<'static, str>> {
        match self.kind {
            FieldKind::Scalar { .. } => Some(Cow::Borrowed(self.name)),
            FieldKind::Reference { .. } => Some(Cow::Owned(reference_column(self.name))),
            FieldKind::Relation { .. } => None,
        }
    }

    /// The model a reference or relation points at.
    pub fn target(&self) -> Option<&'static ModelInfo> {
        match self.kind {
            FieldKind::Reference { target } | FieldKind::Relation { target } => Some(target()),
            FieldKind::Scalar { .. } => None,
        }
    }

    /// Value a freshly created row holds for this property.
    pub fn default_value(&self) -> Value {
        match self.kind {
            FieldKind::Scalar { default, .. } => default(),
            FieldKind::Reference { .. } | FieldKind::Relation { .. } => Value::Null,
        }
    }
}

/// Column name of a reference property.
pub fn reference_column(field: &str) -> String {
    format!("fk_{}_id", field)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nowhere() -> &'static ModelInfo {
        static INFO: ModelInfo = ModelInfo {
            name: "Address",
            fields: &[],
        };
        &INFO
    }

    #[test]
    fn column_names_per_kind() {
        let scalar = FieldInfo::scalar("city", SqlType::Text, false, || Value::Text(String::new()));
        let reference = FieldInfo::reference("address", nowhere);
        let relation = FieldInfo::relation("friends", nowhere);

        assert_eq!(scalar.column_name().as_deref(), Some("city"));
        assert_eq!(reference.column_name().as_deref(), Some("fk_address_id"));
        assert_eq!(relation.column_name(), None);
        assert_eq!(reference.target().map(|m| m.name), Some("Address"));
        assert_eq!(reference.default_value(), Value::Null);
        assert_eq!(scalar.default_value(), Value::Text(String::new()));
    }
}
