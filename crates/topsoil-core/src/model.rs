//! Model trait and static model metadata.
//!
//! Every model type is a thin generated struct around a [`ModelHandle`]; the
//! handle carries the identity and a link to the owning database, and every
//! property access is a storage operation. Use the [`model!`](crate::model!)
//! macro to declare one.

use crate::Result;
use crate::error::{SchemaError, SchemaErrorKind};
use crate::field::{FieldInfo, FieldKind};
use crate::handle::ModelHandle;
use crate::types::Column;
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::OnceLock;

/// Static description of a model type.
#[derive(Debug)]
pub struct ModelInfo {
    /// Model type name; table names are derived from it
    pub name: &'static str,
    /// Properties in declaration order
    pub fields: &'static [FieldInfo],
}

impl ModelInfo {
    /// Name of the table holding this model's rows.
    pub fn table_name(&self) -> String {
        format!("{}_table", self.name)
    }

    /// Name of the join table backing a relation property.
    pub fn relation_table_name(&self, field: &FieldInfo) -> String {
        format!("{}_{}_list_table", self.name, field.name)
    }

    /// Look up a property by name.
    pub fn field(&self, name: &str) -> Option<&'static FieldInfo> {
        // `fields` is 'static, so the element borrows are too.
        let fields: &'static [FieldInfo] = self.fields;
        fields.iter().find(|f| f.name == name)
    }

    /// Look up a property by name, failing with a schema error.
    pub fn require_field(&self, name: &str) -> Result<&'static FieldInfo> {
        self.field(name).ok_or_else(|| {
            SchemaError::new(
                SchemaErrorKind::UnknownField,
                format!("model {} has no property '{}'", self.name, name),
            )
            .into()
        })
    }

    /// Properties stored in this model's own table, in declaration order.
    pub fn column_fields(&self) -> impl Iterator<Item = &'static FieldInfo> {
        let fields: &'static [FieldInfo] = self.fields;
        fields.iter().filter(|f| !f.is_relation())
    }

    /// Properties backed by join tables.
    pub fn relation_fields(&self) -> impl Iterator<Item = &'static FieldInfo> {
        let fields: &'static [FieldInfo] = self.fields;
        fields.iter().filter(|f| f.is_relation())
    }

    /// Models this one points at through references or relations,
    /// excluding itself.
    pub fn dependencies(&self) -> Vec<&'static ModelInfo> {
        let mut deps: Vec<&'static ModelInfo> = Vec::new();
        for field in self.fields {
            if let FieldKind::Reference { target } | FieldKind::Relation { target } = field.kind {
                let target = target();
                if target.name != self.name && !deps.iter().any(|d| d.name == target.name) {
                    deps.push(target);
                }
            }
        }
        deps
    }

    /// Check that the model and property names are usable as identifiers.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(self.name) {
            return Err(SchemaError::new(
                SchemaErrorKind::InvalidName,
                format!("'{}' is not a valid model name", self.name),
            )
            .into());
        }
        for field in self.fields {
            if !is_identifier(field.name) || field.name == "id" {
                return Err(SchemaError::new(
                    SchemaErrorKind::InvalidName,
                    format!("'{}' is not a valid property name on {}", field.name, self.name),
                )
                .into());
            }
        }
        Ok(())
    }
}

impl PartialEq for ModelInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ModelInfo {}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$") {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!(error = %e, "identifier pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Whether `name` can be used verbatim as a table or column name.
pub fn is_identifier(name: &str) -> bool {
    identifier_pattern().is_some_and(|re| re.is_match(name))
}

/// Quote an identifier for use in generated SQL, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The identity of a persisted model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Id(i64);

impl Id {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn greater_than(self, value: i64) -> bool {
        self.0 > value
    }

    pub const fn greater_than_or_equal(self, value: i64) -> bool {
        self.0 >= value
    }

    pub const fn less_than(self, value: i64) -> bool {
        self.0 < value
    }

    pub const fn less_than_or_equal(self, value: i64) -> bool {
        self.0 <= value
    }

    /// Inclusive range check.
    pub const fn between(self, min: i64, max: i64) -> bool {
        self.0 >= min && self.0 <= max
    }

    pub const fn not_between(self, min: i64, max: i64) -> bool {
        self.0 < min || self.0 > max
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Id> for i64 {
    fn from(id: Id) -> Self {
        id.0
    }
}

impl From<Id> for Value {
    fn from(id: Id) -> Self {
        Value::BigInt(id.0)
    }
}

/// A model type backed by a table.
pub trait Model: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Model type name.
    const NAME: &'static str;

    /// Static metadata for this model.
    fn info() -> &'static ModelInfo;

    /// Wrap a handle produced by the database.
    fn from_handle(handle: ModelHandle) -> Self;

    /// The handle behind this proxy.
    fn handle(&self) -> &ModelHandle;

    /// The assigned identity.
    fn id(&self) -> Result<Id> {
        self.handle().id()
    }

    /// Group property writes into one all-or-nothing update.
    ///
    /// `transaction` receives a buffering proxy of the same row. Its writes
    /// are flushed as a single statement when it returns `Ok`; when it
    /// returns `Err` (or panics) nothing is written and the error is passed
    /// back. The buffering proxy expires when `commit` returns; later use
    /// of a kept copy fails with `Error::Unsupported`.
    fn commit<F>(&self, transaction: F) -> Result<()>
    where
        F: FnOnce(&Self) -> Result<()>,
    {
        let scope = self.handle().begin_scope();
        let _guard = ScopeGuard(&scope);
        let proxy = Self::from_handle(scope.clone());
        transaction(&proxy)?;
        scope.flush_scope()
    }

    /// A new, unpersisted copy of this model's values without identity.
    fn clone_detached(&self) -> Result<Self> {
        self.handle().detached_copy().map(Self::from_handle)
    }

    /// Whether this proxy was invalidated by a delete, drop or close.
    fn is_stale(&self) -> bool {
        self.handle().is_stale()
    }

    /// Render all properties, e.g. `Atom[id=1, name="H", mass=1.008]`.
    fn describe(&self) -> Result<String> {
        self.handle().describe()
    }

    /// Scalar and reference properties as a JSON object.
    fn to_json(&self) -> Result<serde_json::Value> {
        self.handle().to_json()
    }

    /// Read a scalar property through its typed key.
    fn get<T: Column>(&self, property: Property<Self, T>) -> Result<T> {
        self.handle().get(property.name())
    }

    /// Write a scalar property through its typed key.
    fn set<T: Column>(&self, property: Property<Self, T>, value: impl Into<T>) -> Result<()> {
        self.handle().set(property.name(), value.into())
    }

    /// Follow a reference property.
    fn get_reference<R: Model>(&self, reference: Reference<Self, R>) -> Result<Option<R>> {
        self.handle().get_reference(reference.name())
    }

    /// Point a reference property at `target`, or clear it with `None`.
    fn set_reference<R: Model>(&self, reference: Reference<Self, R>, target: Option<&R>) -> Result<()> {
        self.handle().set_reference(reference.name(), target)
    }

    /// Members of a relation property. Detached instances have none.
    fn related<R: Model>(&self, relation: Relation<Self, R>) -> Result<Vec<R>> {
        self.handle().related(relation.name())
    }

    /// Add `other` to a relation. Adding an existing member is a no-op.
    fn relate<R: Model>(&self, relation: Relation<Self, R>, other: &R) -> Result<()> {
        self.handle().relate(relation.name(), other)
    }

    /// Remove `other` from a relation.
    fn unrelate<R: Model>(&self, relation: Relation<Self, R>, other: &R) -> Result<()> {
        self.handle().unrelate(relation.name(), other)
    }

    /// Remove every member of a relation.
    fn clear_relation<R: Model>(&self, relation: Relation<Self, R>) -> Result<()> {
        self.handle().clear_relation(relation.name())
    }

    fn is_related<R: Model>(&self, relation: Relation<Self, R>, other: &R) -> Result<bool> {
        Ok(self.related(relation)?.contains(other))
    }

    /// Observe successful writes to this row through any proxy.
    fn on_change<F>(&self, listener: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.handle().on_change(listener);
    }
}

/// Discards a commit scope that ends without a flush, including by panic.
struct ScopeGuard<'a>(&'a ModelHandle);

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.0.discard_scope();
    }
}

/// Typed key of a scalar property, used by the query builder.
pub struct Property<M, T> {
    name: &'static str,
    _marker: PhantomData<fn() -> (M, T)>,
}

/// Typed key of a reference (foreign key) property.
pub struct Reference<M, R> {
    name: &'static str,
    _marker: PhantomData<fn() -> (M, R)>,
}

/// Typed key of a relation (join table) property.
pub struct Relation<M, R> {
    name: &'static str,
    _marker: PhantomData<fn() -> (M, R)>,
}

macro_rules! property_key {
    ($key:ident) => {
        impl<M, T> $key<M, T> {
            pub const fn new(name: &'static str) -> Self {
                Self {
                    name,
                    _marker: PhantomData,
                }
            }

            pub const fn name(&self) -> &'static str {
                self.name
            }
        }

        impl<M, T> Clone for $key<M, T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<M, T> Copy for $key<M, T> {}

        impl<M, T> fmt::Debug for $key<M, T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($key), self.name)
            }
        }
    };
}

property_key!(Property);
property_key!(Reference);
property_key!(Relation);
