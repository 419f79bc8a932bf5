//! Database configuration and path resolution.

use std::fs;
use std::path::{Path, PathBuf};
use topsoil_core::{ConfigError, Error, Result};
use topsoil_sqlite::SqliteConfig;

/// File name used when the configured path names a directory.
pub const DEFAULT_FILE_NAME: &str = "sqlite.db";

const MEMORY: &str = ":memory:";

/// Configuration for opening a [`DataBase`](crate::DataBase).
///
/// A path ending in `.db` names the database file itself; any other path
/// names a directory that holds `sqlite.db`. Missing parent directories
/// are created when the database is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBaseConfig {
    pub path: PathBuf,
    /// How long a statement waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u32,
    /// Enforce foreign key constraints (`PRAGMA foreign_keys = ON`).
    pub foreign_keys: bool,
}

impl Default for DataBaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(MEMORY),
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }
}

impl DataBaseConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// A private in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY
    }

    /// The database file this configuration points at.
    pub fn database_file(&self) -> Result<PathBuf> {
        if self.path.as_os_str().is_empty() {
            return Err(config_error("database path is empty"));
        }
        if self.is_memory() {
            return Ok(self.path.clone());
        }
        if self.path.extension().is_some_and(|ext| ext == "db") {
            Ok(self.path.clone())
        } else {
            Ok(self.path.join(DEFAULT_FILE_NAME))
        }
    }

    /// Resolve the file, create its parent directories and build the
    /// driver configuration.
    pub fn prepare(&self) -> Result<SqliteConfig> {
        let file = self.database_file()?;
        if !self.is_memory() {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }
        let path = file.to_str().ok_or_else(|| {
            config_error(format!("database path {} is not valid UTF-8", file.display()))
        })?;
        Ok(SqliteConfig::file(path).busy_timeout(self.busy_timeout_ms))
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: message.into(),
    })
}
