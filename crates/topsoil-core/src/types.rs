//! SQL type definitions and the Rust-to-column mapping.

use crate::row::FromValue;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// SQL column types a model property can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Boolean,
    Text,
    Blob,
}

impl SqlType {
    /// Get the SQL type name used in CREATE TABLE statements.
    pub const fn sql_name(&self) -> &'static str {
        match self {
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Float => "FLOAT",
            SqlType::Double => "DOUBLE",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
        }
    }

    /// Check if this type is numeric.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt
                | SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Float
                | SqlType::Double
        )
    }
}

/// A Rust type that can be stored in a scalar model column.
///
/// `default_value` is what a freshly created row holds before the first
/// write: empty text, zero, `false`, or NULL for optional columns.
pub trait Column: FromValue + Into<Value> + Clone + Send + 'static {
    /// The SQL type for this Rust type.
    const SQL_TYPE: SqlType;

    /// Whether the column accepts NULL.
    const NULLABLE: bool = false;

    /// Value written into new rows.
    fn default_value() -> Value;
}

impl Column for bool {
    const SQL_TYPE: SqlType = SqlType::Boolean;

    fn default_value() -> Value {
        Value::Bool(false)
    }
}

impl Column for i8 {
    const SQL_TYPE: SqlType = SqlType::TinyInt;

    fn default_value() -> Value {
        Value::TinyInt(0)
    }
}

impl Column for i16 {
    const SQL_TYPE: SqlType = SqlType::SmallInt;

    fn default_value() -> Value {
        Value::SmallInt(0)
    }
}

impl Column for i32 {
    const SQL_TYPE: SqlType = SqlType::Integer;

    fn default_value() -> Value {
        Value::Int(0)
    }
}

impl Column for i64 {
    const SQL_TYPE: SqlType = SqlType::BigInt;

    fn default_value() -> Value {
        Value::BigInt(0)
    }
}

impl Column for f32 {
    const SQL_TYPE: SqlType = SqlType::Float;

    fn default_value() -> Value {
        Value::Float(0.0)
    }
}

impl Column for f64 {
    const SQL_TYPE: SqlType = SqlType::Double;

    fn default_value() -> Value {
        Value::Double(0.0)
    }
}

impl Column for String {
    const SQL_TYPE: SqlType = SqlType::Text;

    fn default_value() -> Value {
        Value::Text(String::new())
    }
}

impl Column for Vec<u8> {
    const SQL_TYPE: SqlType = SqlType::Blob;

    fn default_value() -> Value {
        Value::Bytes(Vec::new())
    }
}

impl<T: Column> Column for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
    const NULLABLE: bool = true;

    fn default_value() -> Value {
        Value::Null
    }
}
