//! Core types and traits for topsoil.
//!
//! This crate provides the foundational abstractions shared by the other
//! crates:
//!
//! - `Model` trait, `model!` macro and static model metadata
//! - `ModelHandle`, the proxy state behind every model instance
//! - `ModelStore`, the seam through which proxies reach storage
//! - `Processor` implementations enforcing thread affinity
//! - `Value`/`Row` and the shared `Error` type

pub mod error;
pub mod field;
pub mod handle;
mod macros;
pub mod model;
pub mod processor;
pub mod row;
pub mod types;
pub mod value;

pub use error::{
    ConfigError, Error, Result, SchemaError, SchemaErrorKind, StaleReason, StaleReferenceError,
    StorageError, StorageErrorKind, TaskError, TaskErrorKind, TypeError,
};
pub use field::{FieldInfo, FieldKind};
pub use handle::{FieldWrites, ModelHandle, ModelKey, ModelStore};
pub use model::{Id, Model, ModelInfo, Property, Reference, Relation, is_identifier, quote_ident};
pub use processor::{
    CurrentThreadProcessor, EventLoopProcessor, Processor, ProcessorExt, Task, TaskFailure,
    ThreadProcessor,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::{Column, SqlType};
pub use value::Value;
