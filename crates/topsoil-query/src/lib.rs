//! Typed fluent query builder for topsoil.
//!
//! Queries start from `DataBase::select::<M>()`, chain comparisons on the
//! model's typed property keys and execute through a [`QueryExecutor`]:
//!
//! - `where_(key)` opens the first comparison
//! - `and(key)` / `or(key)` extend the predicate, folded left to right
//! - `order_ascending_by` / `order_descending_by` add ORDER BY terms
//! - `as_list`, `as_set`, `first` and `count` execute

pub mod builder;
pub mod clause;
pub mod expr;

pub use builder::{
    Compare, CompiledQuery, Executable, Junction, OrderKey, Query, QueryExecutor, Selector, Where,
};
pub use clause::{OrderBy, OrderDirection};
pub use expr::{Comparison, ComparisonOp, Connective, Target};
