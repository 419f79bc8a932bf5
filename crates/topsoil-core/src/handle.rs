//! Shared proxy state behind every model value.
//!
//! A [`ModelHandle`] is what a generated model struct wraps. All copies of a
//! model with the same identity share one `Arc<HandleInner>`, so marking it
//! stale on delete or close is visible through every copy. Reads and writes
//! go through the [`ModelStore`] the handle was created by, which routes
//! them onto the storage thread.

use crate::Result;
use crate::error::{Error, StaleReason, StaleReferenceError};
use crate::field::{FieldInfo, FieldKind};
use crate::model::{Id, Model, ModelInfo};
use crate::types::Column;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Identity of a persisted row.
#[derive(Debug, Clone, Copy)]
pub struct ModelKey {
    pub model: &'static ModelInfo,
    pub id: i64,
}

/// Writes collected for one row, keyed by property name.
pub type FieldWrites = Vec<(&'static FieldInfo, Value)>;

/// Storage operations a handle needs from its database.
///
/// Every method blocks until the storage thread has carried out the
/// operation.
pub trait ModelStore: Send + Sync {
    /// Read one column of a row.
    fn read_field(&self, key: ModelKey, field: &'static FieldInfo) -> Result<Value>;

    /// Read every column property of a row, in declaration order.
    fn read_row(&self, key: ModelKey) -> Result<FieldWrites>;

    /// Write several columns of one row as a single atomic update.
    fn write_fields(&self, key: ModelKey, writes: FieldWrites) -> Result<()>;

    /// Live handle for `(model, id)`, or `None` when no such row exists.
    fn resolve(&self, model: &'static ModelInfo, id: i64) -> Result<Option<ModelHandle>>;

    /// Handles of every row related through a relation property.
    fn related(&self, key: ModelKey, field: &'static FieldInfo) -> Result<Vec<ModelHandle>>;

    /// Add `other` to a relation. Adding an existing member is a no-op.
    fn relate(&self, key: ModelKey, field: &'static FieldInfo, other: i64) -> Result<()>;

    /// Remove `other` from a relation.
    fn unrelate(&self, key: ModelKey, field: &'static FieldInfo, other: i64) -> Result<()>;

    /// Remove every member of a relation.
    fn clear_relation(&self, key: ModelKey, field: &'static FieldInfo) -> Result<()>;
}

type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

enum HandleState {
    Bound(i64),
    Detached(BTreeMap<&'static str, Value>),
    Stale { id: Option<i64>, reason: StaleReason },
}

struct HandleInner {
    model: &'static ModelInfo,
    store: Weak<dyn ModelStore>,
    generation: u64,
    state: Mutex<HandleState>,
    listeners: Mutex<Vec<Listener>>,
}

/// Buffered writes of a commit scope.
struct Scope {
    writes: Mutex<BTreeMap<&'static str, (&'static FieldInfo, Value)>>,
    parent: Option<Arc<Scope>>,
    /// Set once the scope was flushed or discarded.
    closed: AtomicBool,
}

impl Scope {
    fn ensure_open(&self, model: &ModelInfo) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Unsupported(format!(
                "{} proxy used after its commit scope ended",
                model.name
            )));
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.writes).clear();
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some((_, value)) = lock(&self.writes).get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The proxy state of one model row.
#[derive(Clone)]
pub struct ModelHandle {
    inner: Arc<HandleInner>,
    scope: Option<Arc<Scope>>,
}

impl ModelHandle {
    /// Handle for a persisted row.
    pub fn bound(
        model: &'static ModelInfo,
        id: i64,
        store: Weak<dyn ModelStore>,
        generation: u64,
    ) -> Self {
        Self::with_state(model, store, generation, HandleState::Bound(id))
    }

    /// Handle for an unpersisted instance holding `values`.
    pub fn detached(
        model: &'static ModelInfo,
        store: Weak<dyn ModelStore>,
        values: FieldWrites,
    ) -> Self {
        let values = values.into_iter().map(|(f, v)| (f.name, v)).collect();
        Self::with_state(model, store, 0, HandleState::Detached(values))
    }

    fn with_state(
        model: &'static ModelInfo,
        store: Weak<dyn ModelStore>,
        generation: u64,
        state: HandleState,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                model,
                store,
                generation,
                state: Mutex::new(state),
                listeners: Mutex::new(Vec::new()),
            }),
            scope: None,
        }
    }

    pub fn model(&self) -> &'static ModelInfo {
        self.inner.model
    }

    /// Arena generation this handle was issued under.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Whether both handles share the same proxy state.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether this handle was issued by `store`.
    pub fn belongs_to(&self, store: &Weak<dyn ModelStore>) -> bool {
        Weak::ptr_eq(&self.inner.store, store)
    }

    /// Whether this handle is a buffering commit-scope proxy.
    pub fn in_scope(&self) -> bool {
        self.scope.is_some()
    }

    pub fn is_stale(&self) -> bool {
        matches!(*lock(&self.inner.state), HandleState::Stale { .. })
    }

    pub fn is_detached(&self) -> bool {
        matches!(*lock(&self.inner.state), HandleState::Detached(_))
    }

    /// Invalidate every copy of this handle.
    pub fn mark_stale(&self, reason: StaleReason) {
        let mut state = lock(&self.inner.state);
        let id = match &*state {
            HandleState::Bound(id) => Some(*id),
            HandleState::Stale { .. } => return,
            HandleState::Detached(_) => None,
        };
        *state = HandleState::Stale { id, reason };
    }

    /// Attach a detached handle to the row it was just inserted as.
    pub fn bind(&self, id: i64) -> Result<()> {
        let mut state = lock(&self.inner.state);
        match &*state {
            HandleState::Detached(_) => {}
            HandleState::Bound(_) => {
                return Err(Error::Unsupported(format!(
                    "{} instance is already persisted",
                    self.inner.model.name
                )));
            }
            HandleState::Stale { id, reason } => return Err(self.stale_error(*id, *reason)),
        }
        *state = HandleState::Bound(id);
        Ok(())
    }

    /// Values held by a detached handle, in declaration order.
    pub fn detached_values(&self) -> Option<FieldWrites> {
        match &*lock(&self.inner.state) {
            HandleState::Detached(values) => Some(
                self.inner
                    .model
                    .column_fields()
                    .map(|f| {
                        let value = values.get(f.name).cloned();
                        (f, value.unwrap_or_else(|| f.default_value()))
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    fn stale_error(&self, id: Option<i64>, reason: StaleReason) -> Error {
        tracing::warn!(model = self.inner.model.name, ?id, ?reason, "stale model access");
        Error::StaleReference(StaleReferenceError {
            model: self.inner.model.name,
            id,
            reason,
        })
    }

    /// Row key of a persisted handle.
    pub fn key(&self) -> Result<ModelKey> {
        match &*lock(&self.inner.state) {
            HandleState::Bound(id) => Ok(ModelKey {
                model: self.inner.model,
                id: *id,
            }),
            HandleState::Detached(_) => Err(Error::Unbound {
                model: self.inner.model.name,
            }),
            HandleState::Stale { id, reason } => Err(self.stale_error(*id, *reason)),
        }
    }

    pub fn id(&self) -> Result<Id> {
        self.key().map(|k| Id::new(k.id))
    }

    /// The identity as a query parameter; NULL for detached instances.
    pub fn id_value(&self) -> Value {
        match &*lock(&self.inner.state) {
            HandleState::Bound(id) | HandleState::Stale { id: Some(id), .. } => Value::BigInt(*id),
            _ => Value::Null,
        }
    }

    fn known_id(&self) -> Option<i64> {
        match &*lock(&self.inner.state) {
            HandleState::Bound(id) | HandleState::Stale { id: Some(id), .. } => Some(*id),
            _ => None,
        }
    }

    fn store(&self) -> Result<Arc<dyn ModelStore>> {
        self.inner
            .store
            .upgrade()
            .ok_or_else(|| self.stale_error(self.known_id(), StaleReason::Closed))
    }

    fn field(&self, name: &str) -> Result<&'static FieldInfo> {
        self.inner.model.require_field(name)
    }

    fn column_field(&self, name: &str) -> Result<&'static FieldInfo> {
        let field = self.field(name)?;
        if field.is_relation() {
            return Err(Error::Unsupported(format!(
                "relation '{}' has no column value",
                field.name
            )));
        }
        Ok(field)
    }

    /// Current raw value of a column property.
    pub fn read(&self, name: &str) -> Result<Value> {
        let field = self.column_field(name)?;
        if let Some(scope) = &self.scope {
            scope.ensure_open(self.inner.model)?;
            if let Some(value) = scope.lookup(field.name) {
                return Ok(value);
            }
        }
        let key = {
            let state = lock(&self.inner.state);
            match &*state {
                HandleState::Bound(id) => ModelKey {
                    model: self.inner.model,
                    id: *id,
                },
                HandleState::Detached(values) => {
                    return Ok(values
                        .get(field.name)
                        .cloned()
                        .unwrap_or_else(|| field.default_value()));
                }
                HandleState::Stale { id, reason } => {
                    return Err(self.stale_error(*id, *reason));
                }
            }
        };
        self.store()?.read_field(key, field)
    }

    /// Write a raw value into a column property.
    pub fn write(&self, name: &str, value: Value) -> Result<()> {
        let field = self.column_field(name)?;
        if let Some(scope) = &self.scope {
            scope.ensure_open(self.inner.model)?;
            lock(&scope.writes).insert(field.name, (field, value));
            return Ok(());
        }
        let key = {
            let mut state = lock(&self.inner.state);
            match &mut *state {
                HandleState::Bound(id) => ModelKey {
                    model: self.inner.model,
                    id: *id,
                },
                HandleState::Detached(values) => {
                    values.insert(field.name, value);
                    return Ok(());
                }
                HandleState::Stale { id, reason } => {
                    return Err(self.stale_error(*id, *reason));
                }
            }
        };
        self.store()?.write_fields(key, vec![(field, value.clone())])?;
        self.notify(field.name, &value);
        Ok(())
    }

    /// Typed scalar getter used by generated accessors.
    pub fn get<T: Column>(&self, name: &str) -> Result<T> {
        let value = self.read(name)?;
        T::from_value(&value)
    }

    /// Typed scalar setter used by generated accessors.
    pub fn set<T: Column>(&self, name: &str, value: T) -> Result<()> {
        self.write(name, value.into())
    }

    /// Follow a reference property.
    pub fn get_reference<R: Model>(&self, name: &str) -> Result<Option<R>> {
        let Some(id) = self.read(name)?.as_i64() else {
            return Ok(None);
        };
        let handle = self.store()?.resolve(R::info(), id)?;
        Ok(handle.map(R::from_handle))
    }

    /// Point a reference property at `target`, or clear it.
    pub fn set_reference<R: Model>(&self, name: &str, target: Option<&R>) -> Result<()> {
        let value = match target {
            Some(target) => Value::BigInt(target.handle().key()?.id),
            None => Value::Null,
        };
        self.write(name, value)
    }

    fn relation_key(
        &self,
        name: &str,
        mutating: bool,
    ) -> Result<Option<(ModelKey, &'static FieldInfo)>> {
        let field = self.field(name)?;
        if mutating && self.scope.is_some() {
            return Err(Error::Unsupported(format!(
                "relation '{}' cannot be modified inside a commit scope",
                field.name
            )));
        }
        if !mutating && self.is_detached() {
            return Ok(None);
        }
        Ok(Some((self.key()?, field)))
    }

    /// Members of a relation property.
    pub fn related<R: Model>(&self, name: &str) -> Result<Vec<R>> {
        let Some((key, field)) = self.relation_key(name, false)? else {
            return Ok(Vec::new());
        };
        let handles = self.store()?.related(key, field)?;
        Ok(handles.into_iter().map(R::from_handle).collect())
    }

    pub fn relate<R: Model>(&self, name: &str, other: &R) -> Result<()> {
        if let Some((key, field)) = self.relation_key(name, true)? {
            let other = other.handle().key()?.id;
            self.store()?.relate(key, field, other)?;
        }
        Ok(())
    }

    pub fn unrelate<R: Model>(&self, name: &str, other: &R) -> Result<()> {
        if let Some((key, field)) = self.relation_key(name, true)? {
            let other = other.handle().key()?.id;
            self.store()?.unrelate(key, field, other)?;
        }
        Ok(())
    }

    pub fn clear_relation(&self, name: &str) -> Result<()> {
        if let Some((key, field)) = self.relation_key(name, true)? {
            self.store()?.clear_relation(key, field)?;
        }
        Ok(())
    }

    /// Open a commit scope on this row.
    ///
    /// Scopes nest: a nested scope flushes into its parent, only the
    /// outermost one writes to storage.
    pub fn begin_scope(&self) -> ModelHandle {
        Self {
            inner: Arc::clone(&self.inner),
            scope: Some(Arc::new(Scope {
                writes: Mutex::new(BTreeMap::new()),
                parent: self.scope.clone(),
                closed: AtomicBool::new(false),
            })),
        }
    }

    /// Apply the writes buffered by a scope opened with [`begin_scope`]
    /// and close it. Proxies of a closed scope reject reads and writes.
    ///
    /// [`begin_scope`]: Self::begin_scope
    pub fn flush_scope(&self) -> Result<()> {
        let Some(scope) = &self.scope else {
            return Ok(());
        };
        scope.ensure_open(self.inner.model)?;
        let writes = std::mem::take(&mut *lock(&scope.writes));
        scope.close();
        if writes.is_empty() {
            return Ok(());
        }
        if let Some(parent) = &scope.parent {
            parent.ensure_open(self.inner.model)?;
            lock(&parent.writes).extend(writes);
            return Ok(());
        }

        let writes: FieldWrites = writes.into_values().collect();
        let key = {
            let mut state = lock(&self.inner.state);
            match &mut *state {
                HandleState::Bound(id) => ModelKey {
                    model: self.inner.model,
                    id: *id,
                },
                HandleState::Detached(values) => {
                    for (field, value) in writes {
                        values.insert(field.name, value);
                    }
                    return Ok(());
                }
                HandleState::Stale { id, reason } => {
                    return Err(self.stale_error(*id, *reason));
                }
            }
        };
        tracing::debug!(
            model = self.inner.model.name,
            id = key.id,
            count = writes.len(),
            "flushing commit scope"
        );
        self.store()?.write_fields(key, writes.clone())?;
        for (field, value) in &writes {
            self.notify(field.name, value);
        }
        Ok(())
    }

    /// Copy this row's values into a new detached handle.
    pub fn detached_copy(&self) -> Result<ModelHandle> {
        let values = self.column_values()?;
        Ok(Self::detached(
            self.inner.model,
            self.inner.store.clone(),
            values,
        ))
    }

    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        lock(&self.inner.listeners).push(Arc::new(listener));
    }

    fn notify(&self, field: &str, value: &Value) {
        let listeners = lock(&self.inner.listeners).clone();
        for listener in listeners {
            listener(field, value);
        }
    }

    fn column_values(&self) -> Result<FieldWrites> {
        let mut values = match self.detached_values() {
            Some(values) => values,
            None => {
                let key = self.key()?;
                self.store()?.read_row(key)?
            }
        };
        if let Some(scope) = &self.scope {
            scope.ensure_open(self.inner.model)?;
            for (field, value) in &mut values {
                if let Some(buffered) = scope.lookup(field.name) {
                    *value = buffered;
                }
            }
        }
        Ok(values)
    }

    /// Close a scope without applying its writes.
    pub fn discard_scope(&self) {
        if let Some(scope) = &self.scope {
            scope.close();
        }
    }

    /// `Name[id=1, field=value, ...]` with every property.
    pub fn describe(&self) -> Result<String> {
        let model = self.inner.model;
        let mut parts = Vec::new();
        match self.known_id() {
            Some(id) => parts.push(format!("id={}", id)),
            None => parts.push("id=none".to_string()),
        }
        for (field, value) in self.column_values()? {
            let rendered = match (field.kind, value.as_i64()) {
                (FieldKind::Reference { target }, Some(id)) => {
                    format!("{}[id={}]", target().name, id)
                }
                _ => value.to_string(),
            };
            parts.push(format!("{}={}", field.name, rendered));
        }
        if !self.is_detached() {
            let key = self.key()?;
            for field in model.relation_fields() {
                let ids: Vec<String> = self
                    .store()?
                    .related(key, field)?
                    .iter()
                    .map(|h| h.id_value().to_string())
                    .collect();
                parts.push(format!("{}=[{}]", field.name, ids.join(", ")));
            }
        }
        Ok(format!("{}[{}]", model.name, parts.join(", ")))
    }

    /// Column properties as a JSON object, with `id` first.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut object = serde_json::Map::new();
        object.insert("id".to_string(), self.id_value().to_json());
        for (field, value) in self.column_values()? {
            object.insert(field.name.to_string(), value.to_json());
        }
        Ok(serde_json::Value::Object(object))
    }
}

impl PartialEq for ModelHandle {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.known_id(), other.known_id()) {
            (Some(a), Some(b)) => a == b && self.inner.model == other.inner.model,
            _ => false,
        }
    }
}

impl Eq for ModelHandle {}

impl Hash for ModelHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.model.name.hash(state);
        match self.known_id() {
            Some(id) => id.hash(state),
            None => Arc::as_ptr(&self.inner).hash(state),
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.inner.model.name;
        match &*lock(&self.inner.state) {
            HandleState::Bound(id) => write!(f, "{}[id={}]", name, id),
            HandleState::Detached(_) => write!(f, "{}[detached]", name),
            HandleState::Stale { id: Some(id), .. } => write!(f, "{}[id={}, stale]", name, id),
            HandleState::Stale { id: None, .. } => write!(f, "{}[stale]", name),
        }
    }
}
