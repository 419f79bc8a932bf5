//! Typed SQLite-backed models with a fluent query DSL and thread-affine
//! storage access.
//!
//! `topsoil` presents application data as typed model proxies whose
//! property reads and writes turn into SQL at call time:
//!
//! - Models are declared with [`model!`]; each property gets a getter, a
//!   setter and a typed key for queries
//! - Tables are derived from model shape, including reference (foreign
//!   key) columns and one join table per relation property
//! - Queries are built from typed keys and fold `and`/`or` strictly left
//!   to right
//! - Every storage call runs on the owner thread of a [`Processor`], no
//!   matter which thread issued it
//!
//! # Quick Start
//!
//! ```ignore
//! use topsoil::prelude::*;
//!
//! model! {
//!     pub struct Food {
//!         NAME => name, set_name: String,
//!         HEALTHY => healthy, set_healthy: bool,
//!         CALORIES => calories, set_calories: i32,
//!     }
//! }
//!
//! let db = DataBase::at("data/pantry")?;
//! db.create_tables_for(&[Food::info()])?;
//!
//! let apple = db.create::<Food>()?;
//! apple.commit(|tx| {
//!     tx.set_name("Apple")?;
//!     tx.set_healthy(true)?;
//!     tx.set_calories(52)
//! })?;
//!
//! let light = db
//!     .select::<Food>()
//!     .where_(Food::HEALTHY).equal(true)
//!     .and(Food::CALORIES).less_than(100)
//!     .order_ascending_by(Food::NAME)
//!     .as_list()?;
//! ```

mod arena;
pub mod config;
pub mod database;
mod engine;

pub use config::DataBaseConfig;
pub use database::{DataBase, ExecuteOutcome};

pub use topsoil_core::{
    ConfigError, CurrentThreadProcessor, Error, EventLoopProcessor, FieldInfo, FieldKind, Id,
    Model, ModelHandle, ModelInfo, Processor, ProcessorExt, Property, Reference, Relation,
    Result, SchemaError, SchemaErrorKind, SqlType, StaleReason, StaleReferenceError,
    StorageError, StorageErrorKind, Task, TaskError, TaskErrorKind, TaskFailure, ThreadProcessor,
    TypeError, Value, model,
};
pub use topsoil_query::{
    Compare, CompiledQuery, ComparisonOp, Executable, Junction, OrderDirection, Query, Where,
};
pub use topsoil_sqlite::{sqlite_version, sqlite_version_number};

pub mod prelude;
