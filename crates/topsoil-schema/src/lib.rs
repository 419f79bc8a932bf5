//! Schema derivation for topsoil.
//!
//! This crate provides:
//! - CREATE TABLE generation for model tables and relation join tables
//! - The registry of model types known to a database
//! - Creation ordering across references, with cycle and dangling-target
//!   detection

pub mod registry;
pub mod table;

pub use registry::Registry;
pub use table::{CreateTable, RelationTable, drop_table_sql, relation_tables};
