//! The storage coordinator.
//!
//! A [`DataBase`] owns one SQLite connection and routes every operation on
//! it through a [`Processor`], so the connection is only ever touched by
//! the processor's owner thread. Model proxies reach storage through the
//! same path via the [`ModelStore`] implementation below.

use crate::config::DataBaseConfig;
use crate::engine::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use topsoil_core::{
    CurrentThreadProcessor, Error, FieldInfo, FieldWrites, Id, Model, ModelHandle, ModelInfo,
    ModelKey, ModelStore, Processor, ProcessorExt, Result, StaleReason, TaskFailure, Value,
};
use topsoil_query::{CompiledQuery, Executable, QueryExecutor, Where};

fn lock(engine: &Mutex<Engine>) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    processor: Arc<dyn Processor>,
    engine: Arc<Mutex<Engine>>,
    file: PathBuf,
}

impl Shared {
    /// Run `work` against the engine on the owner thread and hand back its
    /// result.
    fn run<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Engine) -> Result<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        self.processor
            .process_now_and_get(move || work(&mut lock(&engine)))
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let engine = Arc::clone(&self.engine);
        self.processor
            .process(Box::new(move || lock(&engine).close()));
    }
}

impl ModelStore for Shared {
    fn read_field(&self, key: ModelKey, field: &'static FieldInfo) -> Result<Value> {
        self.run(move |engine| engine.read_field(key, field))
    }

    fn read_row(&self, key: ModelKey) -> Result<FieldWrites> {
        self.run(move |engine| engine.read_row(key))
    }

    fn write_fields(&self, key: ModelKey, writes: FieldWrites) -> Result<()> {
        self.run(move |engine| engine.write_fields(key, writes))
    }

    fn resolve(&self, model: &'static ModelInfo, id: i64) -> Result<Option<ModelHandle>> {
        self.run(move |engine| engine.resolve(model, id))
    }

    fn related(&self, key: ModelKey, field: &'static FieldInfo) -> Result<Vec<ModelHandle>> {
        self.run(move |engine| engine.related(key, field))
    }

    fn relate(&self, key: ModelKey, field: &'static FieldInfo, other: i64) -> Result<()> {
        self.run(move |engine| engine.relate(key, field, other))
    }

    fn unrelate(&self, key: ModelKey, field: &'static FieldInfo, other: i64) -> Result<()> {
        self.run(move |engine| engine.unrelate(key, field, other))
    }

    fn clear_relation(&self, key: ModelKey, field: &'static FieldInfo) -> Result<()> {
        self.run(move |engine| engine.clear_relation(key, field))
    }
}

impl QueryExecutor for Shared {
    fn fetch(&self, query: &CompiledQuery) -> Result<Vec<ModelHandle>> {
        let query = query.clone();
        self.run(move |engine| engine.fetch(&query))
    }

    fn count(&self, query: &CompiledQuery) -> Result<usize> {
        let query = query.clone();
        self.run(move |engine| engine.count(&query))
    }
}

/// Result of a raw statement run with [`DataBase::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    pub success: bool,
    /// Rows changed by the last statement
    pub changes: u64,
    /// Engine message when the statement failed
    pub error: Option<String>,
}

impl ExecuteOutcome {
    fn succeeded(changes: u64) -> Self {
        Self {
            success: true,
            changes,
            error: None,
        }
    }

    fn failed(error: &Error) -> Self {
        Self {
            success: false,
            changes: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// A SQLite database holding model tables.
///
/// Cheap to clone; clones share the connection. The connection is closed
/// by [`close`](Self::close) or when the last clone is dropped.
///
/// # Example
///
/// ```ignore
/// let db = DataBase::at("data/people")?;
/// db.create_tables_for(&[Address::info(), Person::info()])?;
///
/// let person = db.create::<Person>()?;
/// person.set_first_name("Ada")?;
///
/// let adults = db
///     .select::<Person>()
///     .where_(Person::AGE)
///     .greater_than_or_equal(18)
///     .as_list()?;
/// ```
#[derive(Clone)]
pub struct DataBase {
    shared: Arc<Shared>,
}

impl DataBase {
    /// Open the database at `path` owned by the calling thread.
    pub fn at(path: impl AsRef<Path>) -> Result<Self> {
        Self::at_with(path, Arc::new(CurrentThreadProcessor::new()))
    }

    /// Open the database at `path`, routing storage work through
    /// `processor`.
    pub fn at_with(path: impl AsRef<Path>, processor: Arc<dyn Processor>) -> Result<Self> {
        Self::open(DataBaseConfig::new(path), processor)
    }

    /// A private in-memory database owned by the calling thread.
    pub fn in_memory() -> Result<Self> {
        Self::open(
            DataBaseConfig::memory(),
            Arc::new(CurrentThreadProcessor::new()),
        )
    }

    #[tracing::instrument(level = "info", skip(processor))]
    pub fn open(config: DataBaseConfig, processor: Arc<dyn Processor>) -> Result<Self> {
        let file = config.database_file()?;
        let foreign_keys = config.foreign_keys;
        let conn = processor.process_now_and_get(move || Engine::connect(&config))?;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let store: Weak<dyn ModelStore> = weak.clone();
            Shared {
                processor,
                engine: Arc::new(Mutex::new(Engine::new(conn, foreign_keys, store))),
                file,
            }
        });
        Ok(Self { shared })
    }

    /// The database file, or `:memory:`.
    pub fn file(&self) -> &Path {
        &self.shared.file
    }

    pub fn processor(&self) -> Arc<dyn Processor> {
        Arc::clone(&self.shared.processor)
    }

    /// Receive failures of work submitted with [`submit`](Self::submit).
    pub fn subscribe_failures(&self) -> Receiver<TaskFailure> {
        self.shared.processor.subscribe_failures()
    }

    fn store(&self) -> Weak<dyn ModelStore> {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        weak
    }

    // ==================== Schema ====================

    /// Create the tables of a registration set.
    ///
    /// Every model a member references or relates to must be part of the
    /// set or already registered. Existing tables are kept.
    #[tracing::instrument(level = "info", skip(self, models), fields(count = models.len()))]
    pub fn create_tables_for(&self, models: &[&'static ModelInfo]) -> Result<()> {
        let models = models.to_vec();
        self.shared.run(move |engine| engine.create_tables(&models))
    }

    pub fn create_table_for<M: Model>(&self) -> Result<()> {
        self.create_tables_for(&[M::info()])
    }

    /// Drop the tables of `models` with their relation tables.
    #[tracing::instrument(level = "info", skip(self, models), fields(count = models.len()))]
    pub fn drop_tables_for(&self, models: &[&'static ModelInfo]) -> Result<()> {
        let models = models.to_vec();
        self.shared.run(move |engine| engine.drop_tables(&models))
    }

    pub fn drop_table<M: Model>(&self) -> Result<()> {
        self.drop_tables_for(&[M::info()])
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub fn drop_all_tables(&self) -> Result<()> {
        self.shared.run(Engine::drop_all_tables)
    }

    /// Names of all user tables, ordered by name.
    pub fn list_of_all_table_names(&self) -> Result<Vec<String>> {
        self.shared.run(|engine| engine.table_names())
    }

    /// The stored CREATE TABLE statement of `M`'s table.
    pub fn sql_code_of_table<M: Model>(&self) -> Result<String> {
        self.shared.run(|engine| engine.table_sql(M::info()))
    }

    // ==================== Models ====================

    /// Insert a new row holding type defaults.
    #[tracing::instrument(level = "debug", skip(self), fields(model = M::NAME))]
    pub fn create<M: Model>(&self) -> Result<M> {
        self.shared
            .run(|engine| engine.create(M::info()))
            .map(M::from_handle)
    }

    /// A new unpersisted instance holding type defaults.
    pub fn detached<M: Model>(&self) -> M {
        M::from_handle(ModelHandle::detached(M::info(), self.store(), Vec::new()))
    }

    /// Persist a detached instance with its current values.
    ///
    /// An instance detached from this database becomes bound to the new
    /// row; the returned proxy shares its handle.
    #[tracing::instrument(level = "debug", skip(self, model), fields(model = M::NAME))]
    pub fn insert<M: Model>(&self, model: &M) -> Result<M> {
        let handle = model.handle().clone();
        self.shared
            .run(move |engine| engine.insert(handle))
            .map(M::from_handle)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(model = M::NAME))]
    pub fn select_by_id<M: Model>(&self, id: Id) -> Result<Option<M>> {
        let handle = self
            .shared
            .run(move |engine| engine.select_by_id(M::info(), id.get()))?;
        Ok(handle.map(M::from_handle))
    }

    pub fn select_all<M: Model>(&self) -> Result<Vec<M>> {
        self.select::<M>().as_list()
    }

    /// Start a query over `M`'s rows.
    pub fn select<M: Model>(&self) -> Where<M> {
        let executor: Arc<dyn QueryExecutor> = self.shared.clone();
        Where::new(executor)
    }

    /// Delete a model's row together with its relation memberships.
    ///
    /// Deleting an already deleted model does nothing.
    #[tracing::instrument(level = "debug", skip(self, model), fields(model = M::NAME))]
    pub fn delete<M: Model>(&self, model: &M) -> Result<()> {
        let key = match model.handle().key() {
            Ok(key) => key,
            Err(Error::StaleReference(e)) if e.reason == StaleReason::Deleted => {
                tracing::debug!(id = ?e.id, "already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.shared.run(move |engine| engine.delete(key)).map(|_| ())
    }

    pub fn delete_all<M: Model>(&self, models: &[M]) -> Result<()> {
        for model in models {
            self.delete(model)?;
        }
        Ok(())
    }

    /// Delete every row a query selects. Returns how many were removed.
    #[tracing::instrument(level = "debug", skip(self, query), fields(model = M::NAME))]
    pub fn delete_matching<M: Model>(&self, query: &impl Executable<M>) -> Result<usize> {
        let compiled = query.compile();
        self.shared.run(move |engine| {
            let mut removed = 0;
            for handle in engine.fetch(&compiled)? {
                if engine.delete(handle.key()?)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    // ==================== Raw SQL ====================

    /// Run raw SQL and report the outcome as data.
    ///
    /// Proxy writes made while a transaction opened here is active join
    /// it, and commit or roll back with it.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn execute(&self, sql: &str) -> ExecuteOutcome {
        let statement = sql.to_string();
        match self.shared.run(move |engine| engine.execute_raw(&statement)) {
            Ok(changes) => ExecuteOutcome::succeeded(changes),
            Err(e) => {
                tracing::warn!(error = %e, "raw statement failed");
                ExecuteOutcome::failed(&e)
            }
        }
    }

    /// Queue raw SQL without waiting for it. Failures go to
    /// [`subscribe_failures`](Self::subscribe_failures) receivers.
    pub fn submit(&self, sql: impl Into<String>) {
        let sql = sql.into();
        let engine = Arc::clone(&self.shared.engine);
        self.shared.processor.process(Box::new(move || {
            lock(&engine).execute_raw(&sql).map(|_| ())
        }));
    }

    // ==================== Lifecycle ====================

    /// Close the connection. Every outstanding proxy becomes stale and
    /// later operations fail. Closing twice is a no-op.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn close(&self) -> Result<()> {
        self.shared.run(Engine::close)
    }

    pub fn is_closed(&self) -> Result<bool> {
        self.shared.run(|engine| Ok(engine.is_closed()))
    }

    /// Number of proxies currently tracked by the identity arena.
    pub fn live_proxy_count(&self) -> Result<usize> {
        self.shared.run(|engine| Ok(engine.live_handles()))
    }
}

impl fmt::Debug for DataBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBase")
            .field("file", &self.shared.file)
            .finish_non_exhaustive()
    }
}
