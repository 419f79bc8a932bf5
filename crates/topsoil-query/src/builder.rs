//! The fluent query chain.
//!
//! ```ignore
//! let adults = db
//!     .select::<Person>()
//!     .where_(Person::AGE).greater_than_or_equal(18)
//!     .and(Person::NAME).like("A%")
//!     .order_ascending_by(Person::NAME)
//!     .as_list()?;
//! ```
//!
//! Every step returns a new value; earlier values stay valid and can be
//! extended or executed again.

use crate::clause::OrderBy;
use crate::expr::{self, Comparison, ComparisonOp, Connective, Target};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use topsoil_core::field::reference_column;
use topsoil_core::{
    Column, Error, Model, ModelHandle, ModelInfo, Property, Reference, Relation, Result, Value,
    quote_ident,
};
use topsoil_schema::RelationTable;

/// Runs compiled queries against storage.
pub trait QueryExecutor: Send + Sync {
    /// Proxies for the rows whose ids the query selects, in result order.
    fn fetch(&self, query: &CompiledQuery) -> Result<Vec<ModelHandle>>;

    /// Number of rows the query selects.
    fn count(&self, query: &CompiledQuery) -> Result<usize>;
}

/// SQL text and parameters of a query, selecting `id` from the model table.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub model: &'static ModelInfo,
    pub sql: String,
    pub params: Vec<Value>,
}

/// A query stage that can be compiled and run: [`Where`], [`Junction`]
/// and [`Query`].
pub trait Executable<M: Model> {
    fn compile(&self) -> CompiledQuery;
}

/// A property usable on the left of a comparison.
pub trait Selector<M>: Copy {
    /// Type of the values it is compared with.
    type Value;

    fn target(&self) -> Target;

    fn encode(value: Self::Value) -> Value;
}

impl<M: Model, T: Column> Selector<M> for Property<M, T> {
    type Value = T;

    fn target(&self) -> Target {
        Target::Column(self.name().to_string())
    }

    fn encode(value: T) -> Value {
        value.into()
    }
}

impl<M: Model, R: Model> Selector<M> for Reference<M, R> {
    type Value = R;

    fn target(&self) -> Target {
        Target::Column(reference_column(self.name()))
    }

    fn encode(value: R) -> Value {
        value.handle().id_value()
    }
}

impl<M: Model, R: Model> Selector<M> for Relation<M, R> {
    type Value = R;

    fn target(&self) -> Target {
        Target::Relation(RelationTable::between(M::info(), self.name(), R::info()))
    }

    fn encode(value: R) -> Value {
        value.handle().id_value()
    }
}

/// A property usable in ORDER BY: scalars and references.
pub trait OrderKey<M>: Copy {
    fn column(&self) -> String;
}

impl<M: Model, T: Column> OrderKey<M> for Property<M, T> {
    fn column(&self) -> String {
        self.name().to_string()
    }
}

impl<M: Model, R: Model> OrderKey<M> for Reference<M, R> {
    fn column(&self) -> String {
        reference_column(self.name())
    }
}

/// One link of the predicate chain; points back at its predecessor.
struct Link {
    prev: Option<Arc<Link>>,
    connective: Connective,
    comparison: Comparison,
}

struct Chain<M> {
    executor: Arc<dyn QueryExecutor>,
    last: Option<Arc<Link>>,
    order: Vec<OrderBy>,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for Chain<M> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            last: self.last.clone(),
            order: self.order.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M: Model> Chain<M> {
    fn push(&self, connective: Connective, comparison: Comparison) -> Self {
        Self {
            last: Some(Arc::new(Link {
                prev: self.last.clone(),
                connective,
                comparison,
            })),
            ..self.clone()
        }
    }

    fn ordered(&self, term: OrderBy) -> Self {
        let mut next = self.clone();
        next.order.push(term);
        next
    }

    fn links(&self) -> Vec<(Connective, &Comparison)> {
        let mut links = Vec::new();
        let mut cursor = self.last.as_deref();
        while let Some(link) = cursor {
            links.push((link.connective, &link.comparison));
            cursor = link.prev.as_deref();
        }
        links.reverse();
        links
    }

    fn compile(&self, limit: Option<u64>) -> CompiledQuery {
        let info = M::info();
        let mut sql = format!(
            "SELECT {} FROM {}",
            quote_ident("id"),
            quote_ident(&info.table_name())
        );
        let mut params = Vec::new();

        let links = self.links();
        if !links.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&expr::fold(&links, &mut params));
        }
        if !self.order.is_empty() {
            let terms: Vec<String> = self.order.iter().map(OrderBy::to_sql).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        tracing::debug!(model = info.name, sql = %sql, params = params.len(), "compiled query");
        CompiledQuery {
            model: info,
            sql,
            params,
        }
    }

    fn as_list(&self) -> Result<Vec<M>> {
        let handles = self.executor.fetch(&self.compile(None))?;
        Ok(handles.into_iter().map(M::from_handle).collect())
    }

    fn first(&self) -> Result<Option<M>> {
        let handles = self.executor.fetch(&self.compile(Some(1)))?;
        Ok(handles.into_iter().next().map(M::from_handle))
    }

    fn count(&self) -> Result<usize> {
        self.executor.count(&self.compile(None))
    }
}

/// The empty predicate: matches every row of `M`.
pub struct Where<M> {
    chain: Chain<M>,
}

/// A pending comparison on one property.
pub struct Compare<M, T> {
    chain: Chain<M>,
    connective: Connective,
    target: Target,
    encode: fn(T) -> Value,
}

/// A predicate with at least one comparison; executable, and extendable
/// with [`and`](Junction::and) / [`or`](Junction::or).
pub struct Junction<M> {
    chain: Chain<M>,
}

/// A predicate with ordering applied.
pub struct Query<M> {
    chain: Chain<M>,
}

impl<M: Model> Where<M> {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            chain: Chain {
                executor,
                last: None,
                order: Vec::new(),
                _marker: PhantomData,
            },
        }
    }

    /// Start the predicate with a comparison on `selector`.
    pub fn where_<S: Selector<M>>(&self, selector: S) -> Compare<M, S::Value> {
        Compare::new(self.chain.clone(), Connective::And, selector)
    }
}

impl<M: Model> Junction<M> {
    pub fn and<S: Selector<M>>(&self, selector: S) -> Compare<M, S::Value> {
        Compare::new(self.chain.clone(), Connective::And, selector)
    }

    pub fn or<S: Selector<M>>(&self, selector: S) -> Compare<M, S::Value> {
        Compare::new(self.chain.clone(), Connective::Or, selector)
    }
}

impl<M: Model, T> Compare<M, T> {
    fn new<S: Selector<M, Value = T>>(chain: Chain<M>, connective: Connective, selector: S) -> Self {
        Self {
            chain,
            connective,
            target: selector.target(),
            encode: S::encode,
        }
    }

    fn finish(self, op: ComparisonOp, values: Vec<Value>) -> Junction<M> {
        let comparison = Comparison::new(self.target, op, values);
        Junction {
            chain: self.chain.push(self.connective, comparison),
        }
    }

    fn single(self, op: ComparisonOp, value: T) -> Junction<M> {
        let value = (self.encode)(value);
        self.finish(op, vec![value])
    }

    fn many<I>(self, op: ComparisonOp, values: I) -> Result<Junction<M>>
    where
        I: IntoIterator,
        I::Item: Into<T>,
    {
        let encode = self.encode;
        let values: Vec<Value> = values.into_iter().map(|v| encode(v.into())).collect();
        if values.is_empty() {
            return Err(Error::EmptyArgument {
                operator: op.as_str(),
            });
        }
        Ok(self.finish(op, values))
    }

    pub fn equal(self, value: impl Into<T>) -> Junction<M> {
        self.single(ComparisonOp::Equal, value.into())
    }

    pub fn not_equal(self, value: impl Into<T>) -> Junction<M> {
        self.single(ComparisonOp::NotEqual, value.into())
    }

    /// SQL `LIKE`: `%` matches any run of characters, `_` a single one.
    pub fn like(self, pattern: impl Into<T>) -> Junction<M> {
        self.single(ComparisonOp::Like, pattern.into())
    }

    pub fn not_like(self, pattern: impl Into<T>) -> Junction<M> {
        self.single(ComparisonOp::NotLike, pattern.into())
    }

    /// Matches any of `values`; fails with `EmptyArgument` when there are
    /// none.
    pub fn is_in<I>(self, values: I) -> Result<Junction<M>>
    where
        I: IntoIterator,
        I::Item: Into<T>,
    {
        self.many(ComparisonOp::In, values)
    }

    /// Matches none of `values`; fails with `EmptyArgument` when there are
    /// none.
    pub fn not_in<I>(self, values: I) -> Result<Junction<M>>
    where
        I: IntoIterator,
        I::Item: Into<T>,
    {
        self.many(ComparisonOp::NotIn, values)
    }

    /// For relations: has no members.
    pub fn is_null(self) -> Junction<M> {
        self.finish(ComparisonOp::IsNull, Vec::new())
    }

    /// For relations: has at least one member.
    pub fn is_not_null(self) -> Junction<M> {
        self.finish(ComparisonOp::IsNotNull, Vec::new())
    }

    pub fn greater_than(self, value: impl Into<T>) -> Junction<M> {
        self.single(ComparisonOp::GreaterThan, value.into())
    }

    pub fn greater_than_or_equal(self, value: impl Into<T>) -> Junction<M> {
        self.single(ComparisonOp::GreaterThanOrEqual, value.into())
    }

    pub fn less_than(self, value: impl Into<T>) -> Junction<M> {
        self.single(ComparisonOp::LessThan, value.into())
    }

    pub fn less_than_or_equal(self, value: impl Into<T>) -> Junction<M> {
        self.single(ComparisonOp::LessThanOrEqual, value.into())
    }
}

macro_rules! executable {
    ($ty:ident) => {
        impl<M: Model> $ty<M> {
            /// Order by `key`, ascending. Repeated calls add further terms.
            pub fn order_ascending_by(&self, key: impl OrderKey<M>) -> Query<M> {
                Query {
                    chain: self.chain.ordered(OrderBy::asc(key.column())),
                }
            }

            /// Order by `key`, descending. Repeated calls add further terms.
            pub fn order_descending_by(&self, key: impl OrderKey<M>) -> Query<M> {
                Query {
                    chain: self.chain.ordered(OrderBy::desc(key.column())),
                }
            }

            /// Execute and materialize the matching rows. Rows that already
            /// have a live proxy come back as that proxy.
            pub fn as_list(&self) -> Result<Vec<M>> {
                self.chain.as_list()
            }

            /// Execute and collect the matching rows into a set.
            pub fn as_set(&self) -> Result<HashSet<M>> {
                Ok(self.chain.as_list()?.into_iter().collect())
            }

            /// The first matching row, if any.
            pub fn first(&self) -> Result<Option<M>> {
                self.chain.first()
            }

            /// Number of matching rows.
            pub fn count(&self) -> Result<usize> {
                self.chain.count()
            }

            /// SQL text and parameters this query executes.
            pub fn compile(&self) -> CompiledQuery {
                self.chain.compile(None)
            }

            /// SQL text this query executes.
            pub fn to_sql(&self) -> String {
                self.chain.compile(None).sql
            }
        }

        impl<M: Model> Executable<M> for $ty<M> {
            fn compile(&self) -> CompiledQuery {
                self.chain.compile(None)
            }
        }

        impl<M> Clone for $ty<M> {
            fn clone(&self) -> Self {
                Self {
                    chain: self.chain.clone(),
                }
            }
        }

        impl<M: Model> fmt::Debug for $ty<M> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("sql", &self.to_sql())
                    .finish()
            }
        }
    };
}

executable!(Where);
executable!(Junction);
executable!(Query);

impl<M: Model, T> fmt::Debug for Compare<M, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compare")
            .field("target", &self.target)
            .field("connective", &self.connective)
            .finish_non_exhaustive()
    }
}
