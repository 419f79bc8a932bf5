//! SQLite connection implementation.
//!
//! Safe wrappers around SQLite's C API. A connection is not tied to a
//! thread by itself; the database facade makes sure only its processor's
//! owner thread ever calls into it.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers
#![allow(clippy::if_not_else)]

use crate::ffi;
use crate::types;
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use topsoil_core::{ColumnInfo, Error, Row, StorageError, StorageErrorKind, Value};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in multi-thread mode (connections not shared between threads).
    pub no_mutex: bool,
    /// Open in serialized mode (connections can be shared).
    pub full_mutex: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// Inner state of the SQLite connection, protected by a mutex.
struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the raw handle is only ever used while the mutex is held.
unsafe impl Send for SqliteInner {}

impl SqliteInner {
    fn handle(&self) -> Result<*mut ffi::sqlite3, Error> {
        if self.db.is_null() {
            Err(StorageError::closed().into())
        } else {
            Ok(self.db)
        }
    }
}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            storage_error(
                StorageErrorKind::Open,
                None,
                "Invalid path: contains null byte".to_string(),
                None,
            )
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if !db.is_null() {
                // SAFETY: db is valid, errmsg returns a valid C string
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close_v2(db);
                    msg
                }
            } else {
                ffi::error_string(rc).to_string()
            };

            return Err(storage_error(
                StorageErrorKind::Open,
                None,
                format!("Failed to open database '{}': {}", config.path, msg),
                Some(rc),
            ));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        tracing::info!(path = %config.path, version = ffi::version(), "opened sqlite database");

        Ok(Self {
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::memory())
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().db.is_null()
    }

    /// Execute SQL directly without preparing (DDL, PRAGMA, multi-statement
    /// scripts).
    pub fn execute_raw(&self, sql: &str) -> Result<(), Error> {
        let inner = self.lock();
        let db = inner.handle()?;
        let c_sql = CString::new(sql).map_err(|_| null_byte(sql))?;

        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        tracing::debug!(sql, "exec");
        // SAFETY: All pointers are valid
        let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

        if rc != ffi::SQLITE_OK {
            let msg = if !errmsg.is_null() {
                // SAFETY: errmsg was allocated by SQLite and is released here
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            } else {
                ffi::error_string(rc).to_string()
            };

            return Err(storage_error(
                error_code_to_kind(rc),
                Some(sql),
                msg,
                Some(rc),
            ));
        }

        Ok(())
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> i64 {
        let inner = self.lock();
        if inner.db.is_null() {
            return 0;
        }
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(inner.db) }
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> i32 {
        let inner = self.lock();
        if inner.db.is_null() {
            return 0;
        }
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_changes(inner.db) }
    }

    /// Rows changed since the connection was opened.
    pub fn total_changes(&self) -> i64 {
        let inner = self.lock();
        if inner.db.is_null() {
            return 0;
        }
        // SAFETY: db is valid
        i64::from(unsafe { ffi::sqlite3_total_changes(inner.db) })
    }

    /// Prepare and execute a query, returning all rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let inner = self.lock();
        let db = inner.handle()?;
        tracing::debug!(sql, params = params.len(), "query");
        let stmt = Statement::prepare(db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let mut col_names = Vec::with_capacity(col_count as usize);
        for i in 0..col_count {
            // SAFETY: stmt is valid, i is in range
            let name = unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i));
            col_names.push(name);
        }
        let columns = Arc::new(ColumnInfo::new(col_names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            let rc = unsafe { ffi::sqlite3_step(stmt.raw) };
            match rc {
                ffi::SQLITE_ROW => {
                    let mut values = Vec::with_capacity(col_count as usize);
                    for i in 0..col_count {
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        values.push(unsafe { types::read_column(stmt.raw, i) });
                    }
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(db, sql, rc)),
            }
        }

        Ok(rows)
    }

    /// Prepare and execute a statement, returning rows affected.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let inner = self.lock();
        let db = inner.handle()?;
        tracing::debug!(sql, params = params.len(), "execute");
        let stmt = Statement::prepare(db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        let rc = unsafe { ffi::sqlite3_step(stmt.raw) };
        match rc {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let changes = unsafe { ffi::sqlite3_changes(db) };
                Ok(changes as u64)
            }
            _ => Err(step_error(db, sql, rc)),
        }
    }

    /// Execute an INSERT and return the last inserted rowid.
    pub fn insert(&self, sql: &str, params: &[Value]) -> Result<i64, Error> {
        self.execute(sql, params)?;
        Ok(self.last_insert_rowid())
    }

    /// Whether a transaction opened with [`begin`](Self::begin) is active.
    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    /// Begin a transaction.
    ///
    /// Inside a transaction opened by raw SQL the work nests as a
    /// savepoint, so it commits or rolls back with the outer transaction.
    pub fn begin(&self) -> Result<SqliteTransaction<'_>, Error> {
        let nested = {
            let inner = self.lock();
            if inner.in_transaction {
                return Err(storage_error(
                    StorageErrorKind::Transaction,
                    None,
                    "Already in a transaction".to_string(),
                    None,
                ));
            }
            let db = inner.handle()?;
            // SAFETY: db is valid while the lock is held
            unsafe { ffi::sqlite3_get_autocommit(db) == 0 }
        };
        self.execute_raw(if nested {
            "SAVEPOINT topsoil_write"
        } else {
            "BEGIN"
        })?;
        self.lock().in_transaction = true;
        Ok(SqliteTransaction {
            conn: self,
            savepoint: nested,
            finished: false,
        })
    }

    fn finish(&self, sql: &'static str, savepoint: bool) -> Result<(), Error> {
        if !self.lock().in_transaction {
            return Err(storage_error(
                StorageErrorKind::Transaction,
                None,
                "Not in a transaction".to_string(),
                None,
            ));
        }
        let result = self.execute_raw(sql);
        let mut inner = self.lock();
        if savepoint {
            // The outer transaction belongs to whoever issued BEGIN.
            inner.in_transaction = false;
        } else {
            // SQLite ends the transaction on its own after some failures.
            // SAFETY: db is valid whenever it is non-null
            inner.in_transaction =
                !inner.db.is_null() && unsafe { ffi::sqlite3_get_autocommit(inner.db) } == 0;
        }
        result
    }

    fn discard_savepoint(&self) {
        if let Err(e) = self.execute_raw("ROLLBACK TO topsoil_write; RELEASE topsoil_write") {
            tracing::debug!(error = %e, "savepoint already gone");
        }
    }

    /// Close the connection. Later calls fail with a `Closed` storage
    /// error; closing twice is a no-op.
    pub fn close(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.db.is_null() {
            return Ok(());
        }
        // SAFETY: db is valid, and every statement is finalized by now
        let rc = unsafe { ffi::sqlite3_close_v2(inner.db) };
        inner.db = ptr::null_mut();
        inner.in_transaction = false;
        if rc != ffi::SQLITE_OK {
            return Err(storage_error(
                error_code_to_kind(rc),
                None,
                ffi::error_string(rc).to_string(),
                Some(rc),
            ));
        }
        tracing::info!(path = %self.path, "closed sqlite database");
        Ok(())
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_close_v2(inner.db);
            }
        }
    }
}

/// An open SQLite transaction. Rolls back on drop unless committed.
pub struct SqliteTransaction<'conn> {
    conn: &'conn SqliteConnection,
    savepoint: bool,
    finished: bool,
}

impl SqliteTransaction<'_> {
    pub fn commit(mut self) -> Result<(), Error> {
        self.finished = true;
        if self.savepoint {
            let result = self.conn.finish("RELEASE topsoil_write", true);
            if result.is_err() {
                self.conn.discard_savepoint();
            }
            result
        } else {
            self.conn.finish("COMMIT", false)
        }
    }

    pub fn rollback(mut self) -> Result<(), Error> {
        self.finished = true;
        self.abort()
    }

    fn abort(&self) -> Result<(), Error> {
        if self.savepoint {
            self.conn
                .finish("ROLLBACK TO topsoil_write; RELEASE topsoil_write", true)
        } else {
            self.conn.finish("ROLLBACK", false)
        }
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.abort() {
                tracing::warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}

/// A prepared statement, finalized on drop.
struct Statement<'a> {
    raw: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
    sql: &'a str,
}

impl<'a> Statement<'a> {
    fn prepare(db: *mut ffi::sqlite3, sql: &'a str) -> Result<Self, Error> {
        let c_sql = CString::new(sql).map_err(|_| null_byte(sql))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };

        if rc != ffi::SQLITE_OK {
            return Err(step_error(db, sql, rc));
        }
        if raw.is_null() {
            // Only whitespace or comments
            return Err(storage_error(
                StorageErrorKind::Syntax,
                Some(sql),
                "empty statement".to_string(),
                None,
            ));
        }
        Ok(Self { raw, db, sql })
    }

    fn bind_all(&self, params: &[Value]) -> Result<(), Error> {
        // SAFETY: raw is valid
        let expected = unsafe { ffi::sqlite3_bind_parameter_count(self.raw) } as usize;
        if expected != params.len() {
            return Err(storage_error(
                StorageErrorKind::Database,
                Some(self.sql),
                format!("expected {} parameters, got {}", expected, params.len()),
                None,
            ));
        }
        for (i, param) in params.iter().enumerate() {
            // SAFETY: raw is valid, index is 1-based and in range
            let rc = unsafe { types::bind_value(self.raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                tracing::debug!(
                    index = i + 1,
                    class = types::storage_class(param),
                    "parameter bind failed"
                );
                // SAFETY: db is valid
                let msg = unsafe { errmsg(self.db) };
                return Err(storage_error(
                    error_code_to_kind(rc),
                    Some(self.sql),
                    format!("Failed to bind parameter {}: {}", i + 1, msg),
                    Some(rc),
                ));
            }
        }
        Ok(())
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        // SAFETY: raw is a valid statement that is finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

/// # Safety
/// `db` must be a valid connection handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: guaranteed by the caller
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn step_error(db: *mut ffi::sqlite3, sql: &str, rc: c_int) -> Error {
    // SAFETY: db is valid
    let msg = unsafe { errmsg(db) };
    storage_error(error_code_to_kind(rc), Some(sql), msg, Some(rc))
}

fn null_byte(sql: &str) -> Error {
    storage_error(
        StorageErrorKind::Syntax,
        Some(sql),
        "SQL contains null byte".to_string(),
        None,
    )
}

fn storage_error(kind: StorageErrorKind, sql: Option<&str>, message: String, code: Option<c_int>) -> Error {
    Error::Storage(StorageError {
        kind,
        sql: sql.map(str::to_string),
        message,
        code,
    })
}

/// Classify a primary (or extended) SQLite result code.
pub fn error_code_to_kind(code: c_int) -> StorageErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT | ffi::SQLITE_MISMATCH => StorageErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => StorageErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => StorageErrorKind::Permission,
        ffi::SQLITE_CANTOPEN | ffi::SQLITE_NOTADB => StorageErrorKind::Open,
        ffi::SQLITE_MISUSE => StorageErrorKind::Closed,
        ffi::SQLITE_ERROR => StorageErrorKind::Syntax,
        ffi::SQLITE_INTERNAL
        | ffi::SQLITE_ABORT
        | ffi::SQLITE_NOMEM
        | ffi::SQLITE_IOERR
        | ffi::SQLITE_CORRUPT => StorageErrorKind::Database,
        _ => StorageErrorKind::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_kind(err: &Error) -> Option<StorageErrorKind> {
        match err {
            Error::Storage(e) => Some(e.kind),
            _ => None,
        }
    }

    #[test]
    fn test_open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_execute_raw() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice')")
            .unwrap();
        assert_eq!(conn.changes(), 1);
        assert_eq!(conn.last_insert_rowid(), 1);
    }

    #[test]
    fn test_query() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice'), ('Bob')")
            .unwrap();

        let rows = conn.query("SELECT * FROM test ORDER BY id", &[]).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].get_named::<i32>("id").unwrap(), 1);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Alice");
        assert_eq!(rows[1].get_named::<i32>("id").unwrap(), 2);
        assert_eq!(rows[1].get_named::<String>("name").unwrap(), "Bob");
    }

    #[test]
    fn test_parameterized_query() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
            .unwrap();

        conn.execute(
            "INSERT INTO test (name, age) VALUES (?, ?)",
            &[Value::Text("Alice".to_string()), Value::Int(30)],
        )
        .unwrap();

        let rows = conn
            .query(
                "SELECT * FROM test WHERE name = ?",
                &[Value::Text("Alice".to_string())],
            )
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<i32>("age").unwrap(), 30);
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let err = conn
            .execute("INSERT INTO test (name) VALUES (?)", &[])
            .unwrap_err();
        assert_eq!(err.sql(), Some("INSERT INTO test (name) VALUES (?)"));
    }

    #[test]
    fn test_null_handling() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::Null])
            .unwrap();

        let rows = conn.query("SELECT * FROM test", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<Option<String>>("name").unwrap(), None);
    }

    #[test]
    fn test_transaction() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        // Dropping without commit rolls back
        {
            let _tx = conn.begin().unwrap();
            assert!(conn.in_transaction());
            conn.execute(
                "INSERT INTO test (name) VALUES (?)",
                &[Value::Text("Alice".to_string())],
            )
            .unwrap();
        }
        assert!(!conn.in_transaction());
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());

        let tx = conn.begin().unwrap();
        assert!(conn.begin().is_err());
        conn.execute(
            "INSERT INTO test (name) VALUES (?)",
            &[Value::Text("Bob".to_string())],
        )
        .unwrap();
        tx.commit().unwrap();

        let rows = conn.query("SELECT * FROM test", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Bob");
    }

    #[test]
    fn test_transaction_nests_inside_raw_begin() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn.execute_raw("BEGIN").unwrap();

        let tx = conn.begin().unwrap();
        assert!(conn.in_transaction());
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice')")
            .unwrap();
        tx.rollback().unwrap();
        assert!(!conn.in_transaction());

        let tx = conn.begin().unwrap();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Bob')")
            .unwrap();
        tx.commit().unwrap();

        // Still inside the outer transaction.
        assert!(conn.execute_raw("BEGIN").is_err());
        conn.execute_raw("COMMIT").unwrap();

        let rows = conn.query("SELECT name FROM test", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Bob");
    }

    #[test]
    fn test_nested_transaction_follows_outer_rollback() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn.execute_raw("BEGIN").unwrap();
        {
            let tx = conn.begin().unwrap();
            conn.execute_raw("INSERT INTO test (name) VALUES ('Carol')")
                .unwrap();
            tx.commit().unwrap();
        }
        conn.execute_raw("ROLLBACK").unwrap();
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_insert_rowid() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        let rowid = conn
            .insert(
                "INSERT INTO test (name) VALUES (?)",
                &[Value::Text("Alice".to_string())],
            )
            .unwrap();
        assert_eq!(rowid, 1);

        let rowid = conn
            .insert(
                "INSERT INTO test (name) VALUES (?)",
                &[Value::Text("Bob".to_string())],
            )
            .unwrap();
        assert_eq!(rowid, 2);
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_type_conversions() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw(
            "CREATE TABLE types (
                b BOOLEAN,
                i INTEGER,
                f REAL,
                t TEXT,
                bl BLOB
            )",
        )
        .unwrap();

        conn.execute(
            "INSERT INTO types VALUES (?, ?, ?, ?, ?)",
            &[
                Value::Bool(true),
                Value::BigInt(42),
                Value::Double(3.14),
                Value::Text("hello".to_string()),
                Value::Bytes(vec![1, 2, 3]),
            ],
        )
        .unwrap();

        let rows = conn.query("SELECT * FROM types", &[]).unwrap();
        assert_eq!(rows.len(), 1);

        // SQLite stores booleans as integers
        assert_eq!(rows[0].get_named::<i32>("b").unwrap(), 1);
        assert!(rows[0].get_named::<bool>("b").unwrap());
        assert_eq!(rows[0].get_named::<i32>("i").unwrap(), 42);
        let f: f64 = rows[0].get_named("f").unwrap();
        assert!((f - 3.14).abs() < 0.001);
        assert_eq!(rows[0].get_named::<String>("t").unwrap(), "hello");
        assert_eq!(rows[0].get_named::<Vec<u8>>("bl").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_error_kinds() {
        let conn = SqliteConnection::open_memory().unwrap();
        let err = conn.execute_raw("CREATE TABLE (").unwrap_err();
        assert_eq!(storage_kind(&err), Some(StorageErrorKind::Syntax));

        conn.execute_raw("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL)")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t (v) VALUES (?)", &[Value::Null])
            .unwrap_err();
        assert_eq!(storage_kind(&err), Some(StorageErrorKind::Constraint));
    }

    #[test]
    fn test_close() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
        conn.close().unwrap();

        let err = conn.query("SELECT 1", &[]).unwrap_err();
        assert_eq!(storage_kind(&err), Some(StorageErrorKind::Closed));
    }

    #[test]
    fn test_open_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.db");

        let config = SqliteConfig::file(path.to_string_lossy().to_string())
            .flags(OpenFlags::create_read_write());
        let conn = SqliteConnection::open(&config).unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER)").unwrap();
        drop(conn);

        let config = SqliteConfig::file(path.to_string_lossy().to_string())
            .flags(OpenFlags::read_only());
        let conn = SqliteConnection::open(&config).unwrap();
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());

        let err = conn.execute_raw("INSERT INTO test VALUES (1)").unwrap_err();
        assert_eq!(storage_kind(&err), Some(StorageErrorKind::Permission));
    }

    #[test]
    fn test_open_missing_file_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let config = SqliteConfig::file(path.to_string_lossy().to_string())
            .flags(OpenFlags::read_write());
        let err = SqliteConnection::open(&config).err().unwrap();
        assert_eq!(storage_kind(&err), Some(StorageErrorKind::Open));
    }
}
