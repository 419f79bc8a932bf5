//! Error types for topsoil operations.

use std::fmt;

/// The primary error type for all topsoil operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid model shape or registration set
    Schema(SchemaError),
    /// A model proxy was used after its row was deleted or its engine closed
    StaleReference(StaleReferenceError),
    /// An identity was requested from an instance that was never persisted
    Unbound {
        /// Name of the model type
        model: &'static str,
    },
    /// A comparison that needs at least one value received none
    EmptyArgument {
        /// The comparison operator (`IN`, `NOT IN`)
        operator: &'static str,
    },
    /// The storage engine rejected a statement
    Storage(StorageError),
    /// Type conversion errors
    Type(TypeError),
    /// Thread-affinity processor failures
    Task(TaskError),
    /// Configuration errors
    Config(ConfigError),
    /// The operation is not available in the current context
    Unsupported(String),
    /// I/O errors
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Model or field name is not a valid identifier
    InvalidName,
    /// A reference or relation points at a type outside the registration set
    MissingTarget,
    /// Two or more models reference each other in a loop
    Cycle,
    /// The model type has not been registered with this database
    NotRegistered,
    /// The table does not exist in the store
    TableNotFound,
    /// A property name does not exist on the model
    UnknownField,
}

#[derive(Debug)]
pub struct StaleReferenceError {
    /// Name of the model type
    pub model: &'static str,
    /// Identity the proxy used to denote, if it had one
    pub id: Option<i64>,
    pub reason: StaleReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The row was deleted
    Deleted,
    /// The database was closed or dropped
    Closed,
    /// The model's table was dropped
    Dropped,
}

#[derive(Debug)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub sql: Option<String>,
    pub message: String,
    /// The raw engine result code, when one is available
    pub code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Failed to open the database
    Open,
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// Database is busy or locked
    Busy,
    /// Permission denied or read-only store
    Permission,
    /// Transaction state mismatch
    Transaction,
    /// The connection was already closed
    Closed,
    /// Other engine error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    /// The task panicked while running on the owner thread
    Panicked,
    /// The processor only accepts work from its owner thread
    WrongThread,
    /// The owner thread is gone and can no longer run tasks
    Disconnected,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl Error {
    /// Is this a stale-proxy error?
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleReference(_))
    }

    /// Is this an error reported by the storage engine?
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    /// Get the SQL that caused this error, if available.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Storage(s) => s.sql.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }

    /// Build a panicked-task error from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Error::Task(TaskError {
            kind: TaskErrorKind::Panicked,
            message,
        })
    }
}

impl SchemaError {
    pub fn new(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl StorageError {
    /// Error for an operation on a connection that was already closed.
    pub fn closed() -> Self {
        Self {
            kind: StorageErrorKind::Closed,
            sql: None,
            message: "database connection is closed".to_string(),
            code: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Schema(e) => write!(f, "Schema error: {}", e),
            Error::StaleReference(e) => write!(f, "Stale reference: {}", e),
            Error::Unbound { model } => {
                write!(f, "Unbound: {} instance has not been persisted", model)
            }
            Error::EmptyArgument { operator } => {
                write!(f, "Empty argument: {} needs at least one value", operator)
            }
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Task(e) => write!(f, "Task error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for StaleReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.reason {
            StaleReason::Deleted => "was deleted",
            StaleReason::Closed => "belongs to a closed database",
            StaleReason::Dropped => "belongs to a dropped table",
        };
        match self.id {
            Some(id) => write!(f, "{}[id={}] {}", self.model, id, what),
            None => write!(f, "{} {}", self.model, what),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sql) = &self.sql {
            write!(f, "{} (sql: {})", self.message, sql)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<StaleReferenceError> for Error {
    fn from(err: StaleReferenceError) -> Self {
        Error::StaleReference(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TaskError> for Error {
    fn from(err: TaskError) -> Self {
        Error::Task(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for topsoil operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_reference_display_names_the_row() {
        let err = Error::StaleReference(StaleReferenceError {
            model: "Person",
            id: Some(7),
            reason: StaleReason::Deleted,
        });
        assert!(err.is_stale());
        assert_eq!(err.to_string(), "Stale reference: Person[id=7] was deleted");
    }

    #[test]
    fn storage_error_carries_sql() {
        let err = Error::Storage(StorageError {
            kind: StorageErrorKind::Syntax,
            sql: Some("SELEC 1".to_string()),
            message: "near \"SELEC\": syntax error".to_string(),
            code: Some(1),
        });
        assert!(err.is_storage());
        assert_eq!(err.sql(), Some("SELEC 1"));
        assert!(err.to_string().contains("sql: SELEC 1"));
    }

    #[test]
    fn panic_payloads_become_task_errors() {
        let err = Error::from_panic(&"boom");
        match err {
            Error::Task(TaskError { kind, message }) => {
                assert_eq!(kind, TaskErrorKind::Panicked);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = Error::from_panic(&String::from("owned boom"));
        assert!(err.to_string().contains("owned boom"));
    }
}
