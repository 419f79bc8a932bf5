//! Glob-import for applications.
//!
//! ```ignore
//! use topsoil::prelude::*;
//! ```

pub use crate::{
    // Coordinator
    DataBase,
    DataBaseConfig,
    ExecuteOutcome,
    // Models
    Id,
    Model,
    Property,
    Reference,
    Relation,
    model,
    // Errors
    Error,
    Result,
    StaleReason,
    // Processors
    CurrentThreadProcessor,
    EventLoopProcessor,
    Processor,
    ProcessorExt,
    ThreadProcessor,
    // Queries
    Executable,
    Junction,
    Query,
    Where,
};
