//! Storage work carried out on the owner thread.
//!
//! The engine owns the connection, the registry and the identity arena.
//! It is only ever reached through the database's processor, so none of
//! its methods synchronize on their own.

use crate::arena::Arena;
use crate::config::DataBaseConfig;
use std::sync::Weak;
use topsoil_core::{
    Error, FieldInfo, FieldWrites, ModelHandle, ModelInfo, ModelKey, ModelStore, Result,
    SchemaError, SchemaErrorKind, StaleReason, StaleReferenceError, StorageError, Value,
    quote_ident,
};
use topsoil_query::CompiledQuery;
use topsoil_schema::{CreateTable, RelationTable, Registry, drop_table_sql, relation_tables};
use topsoil_sqlite::SqliteConnection;

pub(crate) struct Engine {
    conn: Option<SqliteConnection>,
    registry: Registry,
    arena: Arena,
    store: Weak<dyn ModelStore>,
    foreign_keys: bool,
}

fn id_column() -> String {
    quote_ident("id")
}

impl Engine {
    /// Open the connection described by `config`.
    pub(crate) fn connect(config: &DataBaseConfig) -> Result<SqliteConnection> {
        let sqlite = config.prepare()?;
        let conn = SqliteConnection::open(&sqlite)?;
        if config.foreign_keys {
            conn.execute_raw("PRAGMA foreign_keys = ON")?;
        }
        Ok(conn)
    }

    pub(crate) fn new(
        conn: SqliteConnection,
        foreign_keys: bool,
        store: Weak<dyn ModelStore>,
    ) -> Self {
        Self {
            conn: Some(conn),
            registry: Registry::new(),
            arena: Arena::new(),
            store,
            foreign_keys,
        }
    }

    fn conn(&self) -> Result<&SqliteConnection> {
        self.conn.as_ref().ok_or_else(|| StorageError::closed().into())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.arena.len()
    }

    fn ensure_registered(&self, info: &ModelInfo) -> Result<()> {
        self.conn()?;
        self.registry.require(info)
    }

    /// The row behind `key` is gone; invalidate its proxies.
    fn vanished(&mut self, key: ModelKey) -> Error {
        self.arena.evict(key.model, key.id);
        StaleReferenceError {
            model: key.model.name,
            id: Some(key.id),
            reason: StaleReason::Deleted,
        }
        .into()
    }

    // ==================== Schema ====================

    fn table_exists(&self, name: &str) -> Result<bool> {
        let rows = self.conn()?.query(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::Text(name.to_string())],
        )?;
        Ok(!rows.is_empty())
    }

    fn create_if_missing(&self, table: &str, sql: &str) -> Result<()> {
        if self.table_exists(table)? {
            tracing::info!(table, "table already exists, skipping");
            return Ok(());
        }
        self.conn()?.execute_raw(sql)?;
        tracing::info!(table, "created table");
        Ok(())
    }

    /// Create the tables of a registration set and register its models.
    pub(crate) fn create_tables(&mut self, models: &[&'static ModelInfo]) -> Result<()> {
        let conn = self.conn()?;
        let ordered = self.registry.plan(models)?;

        let tx = conn.begin()?;
        for info in &ordered {
            self.create_if_missing(&info.table_name(), &CreateTable::new(info).build())?;
        }
        // Join tables point at model tables, so they come last.
        for info in &ordered {
            for relation in relation_tables(info)? {
                self.create_if_missing(&relation.table, &relation.create_sql())?;
            }
        }
        tx.commit()?;

        for info in ordered {
            self.registry.register(info);
        }
        Ok(())
    }

    /// Run `work` with foreign key enforcement switched off.
    fn with_foreign_keys_off<T>(
        &self,
        work: impl FnOnce(&SqliteConnection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn()?;
        if !self.foreign_keys {
            return work(conn);
        }
        conn.execute_raw("PRAGMA foreign_keys = OFF")?;
        let result = work(conn);
        let restored = conn.execute_raw("PRAGMA foreign_keys = ON");
        let value = result?;
        restored?;
        Ok(value)
    }

    pub(crate) fn drop_tables(&mut self, models: &[&'static ModelInfo]) -> Result<()> {
        for dependent in self.registry.dependents_outside(models) {
            tracing::warn!(
                model = dependent.name,
                "dropping tables a registered model still points at"
            );
        }

        self.with_foreign_keys_off(|conn| {
            for info in models {
                for relation in relation_tables(info)? {
                    conn.execute_raw(&drop_table_sql(&relation.table, true))?;
                }
            }
            for info in models {
                conn.execute_raw(&drop_table_sql(&info.table_name(), true))?;
            }
            Ok(())
        })?;

        for info in models {
            self.registry.unregister(info);
            let evicted = self.arena.evict_model(info, StaleReason::Dropped);
            tracing::info!(model = info.name, evicted, "dropped tables");
        }
        Ok(())
    }

    pub(crate) fn drop_all_tables(&mut self) -> Result<()> {
        let tables = self.table_names()?;
        self.with_foreign_keys_off(|conn| {
            for table in &tables {
                conn.execute_raw(&drop_table_sql(table, true))?;
            }
            Ok(())
        })?;

        self.registry.clear();
        let evicted = self.arena.clear(StaleReason::Dropped);
        tracing::info!(tables = tables.len(), evicted, "dropped all tables");
        Ok(())
    }

    /// User tables, ordered by name.
    pub(crate) fn table_names(&self) -> Result<Vec<String>> {
        let rows = self.conn()?.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )?;
        rows.iter().map(|row| row.get_as::<String>(0)).collect()
    }

    /// The stored CREATE TABLE statement of a model's table.
    pub(crate) fn table_sql(&self, info: &ModelInfo) -> Result<String> {
        let table = info.table_name();
        let rows = self.conn()?.query(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::Text(table.clone())],
        )?;
        match rows.first() {
            Some(row) => row.get_as::<String>(0),
            None => Err(SchemaError::new(
                SchemaErrorKind::TableNotFound,
                format!("table {} does not exist", table),
            )
            .into()),
        }
    }

    // ==================== Rows ====================

    fn insert_row(&self, info: &ModelInfo, values: &FieldWrites) -> Result<i64> {
        self.ensure_registered(info)?;
        let table = quote_ident(&info.table_name());
        let columns: Vec<String> = values
            .iter()
            .filter_map(|(field, _)| field.column_name())
            .map(|column| quote_ident(&column))
            .collect();
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        let params: Vec<Value> = values.iter().map(|(_, value)| value.clone()).collect();
        self.conn()?.insert(&sql, &params)
    }

    /// Insert a row holding type defaults.
    pub(crate) fn create(&mut self, info: &'static ModelInfo) -> Result<ModelHandle> {
        let defaults: FieldWrites = info
            .column_fields()
            .map(|field| (field, field.default_value()))
            .collect();
        let id = self.insert_row(info, &defaults)?;
        tracing::debug!(model = info.name, id, "created row");
        Ok(self.arena.get_or_issue(info, id, &self.store))
    }

    /// Persist a detached instance and bind it to its new row.
    pub(crate) fn insert(&mut self, handle: ModelHandle) -> Result<ModelHandle> {
        let info = handle.model();
        let Some(values) = handle.detached_values() else {
            handle.key()?;
            return Err(Error::Unsupported(format!(
                "{} instance is already persisted",
                info.name
            )));
        };
        let id = self.insert_row(info, &values)?;
        tracing::debug!(model = info.name, id, "inserted detached instance");

        if handle.belongs_to(&self.store) {
            handle.bind(id)?;
            self.arena.adopt(id, handle.clone());
            Ok(handle)
        } else {
            Ok(self.arena.get_or_issue(info, id, &self.store))
        }
    }

    pub(crate) fn select_by_id(
        &mut self,
        info: &'static ModelInfo,
        id: i64,
    ) -> Result<Option<ModelHandle>> {
        self.ensure_registered(info)?;
        self.resolve(info, id)
    }

    pub(crate) fn resolve(
        &mut self,
        info: &'static ModelInfo,
        id: i64,
    ) -> Result<Option<ModelHandle>> {
        if !self.registry.is_registered(info) {
            self.conn()?;
            return Ok(None);
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            id_column(),
            quote_ident(&info.table_name()),
            id_column()
        );
        let rows = self.conn()?.query(&sql, &[Value::BigInt(id)])?;
        if rows.is_empty() {
            // The row may have been removed behind a live proxy.
            self.arena.evict(info, id);
            return Ok(None);
        }
        Ok(Some(self.arena.get_or_issue(info, id, &self.store)))
    }

    pub(crate) fn read_field(&mut self, key: ModelKey, field: &'static FieldInfo) -> Result<Value> {
        let Some(column) = field.column_name() else {
            return Err(Error::Unsupported(format!(
                "relation '{}' has no column value",
                field.name
            )));
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            quote_ident(&column),
            quote_ident(&key.model.table_name()),
            id_column()
        );
        let rows = self.conn()?.query(&sql, &[Value::BigInt(key.id)])?;
        match rows.into_iter().next() {
            Some(row) => Ok(row.into_values().into_iter().next().unwrap_or(Value::Null)),
            None => Err(self.vanished(key)),
        }
    }

    pub(crate) fn read_row(&mut self, key: ModelKey) -> Result<FieldWrites> {
        let fields: Vec<&'static FieldInfo> = key.model.column_fields().collect();
        let mut columns = vec![id_column()];
        columns.extend(
            fields
                .iter()
                .filter_map(|field| field.column_name())
                .map(|column| quote_ident(&column)),
        );
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            columns.join(", "),
            quote_ident(&key.model.table_name()),
            id_column()
        );
        let rows = self.conn()?.query(&sql, &[Value::BigInt(key.id)])?;
        let Some(row) = rows.into_iter().next() else {
            return Err(self.vanished(key));
        };
        Ok(fields
            .into_iter()
            .zip(row.into_values().into_iter().skip(1))
            .collect())
    }

    /// Apply writes to one row in a single transaction.
    pub(crate) fn write_fields(&mut self, key: ModelKey, writes: FieldWrites) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let assignments: Vec<String> = writes
            .iter()
            .filter_map(|(field, _)| field.column_name())
            .map(|column| format!("{} = ?", quote_ident(&column)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_ident(&key.model.table_name()),
            assignments.join(", "),
            id_column()
        );
        let mut params: Vec<Value> = writes.into_iter().map(|(_, value)| value).collect();
        params.push(Value::BigInt(key.id));

        let changed = {
            let conn = self.conn()?;
            let tx = conn.begin()?;
            let changed = conn.execute(&sql, &params)?;
            tx.commit()?;
            changed
        };
        if changed == 0 {
            return Err(self.vanished(key));
        }
        Ok(())
    }

    /// Delete a row with every join row that mentions it.
    ///
    /// Returns `false` when the row was already gone.
    pub(crate) fn delete(&mut self, key: ModelKey) -> Result<bool> {
        self.ensure_registered(key.model)?;
        let touching = self.registry.relations_touching(key.model);

        let removed = {
            let conn = self.conn()?;
            let tx = conn.begin()?;
            for (owner, field) in touching {
                let relation = RelationTable::of(owner, field)?;
                let mut clauses = Vec::new();
                if owner.name == key.model.name {
                    clauses.push(format!("{} = ?", quote_ident(&relation.self_column)));
                }
                if field.target().is_some_and(|t| t.name == key.model.name) {
                    clauses.push(format!("{} = ?", quote_ident(&relation.other_column)));
                }
                let sql = format!(
                    "DELETE FROM {} WHERE {}",
                    quote_ident(&relation.table),
                    clauses.join(" OR ")
                );
                conn.execute(&sql, &vec![Value::BigInt(key.id); clauses.len()])?;
            }
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                quote_ident(&key.model.table_name()),
                id_column()
            );
            let removed = conn.execute(&sql, &[Value::BigInt(key.id)])?;
            tx.commit()?;
            removed
        };

        self.arena.evict(key.model, key.id);
        tracing::debug!(model = key.model.name, id = key.id, removed, "deleted row");
        Ok(removed > 0)
    }

    // ==================== Relations ====================

    fn relation_target(field: &FieldInfo) -> Result<&'static ModelInfo> {
        field.target().ok_or_else(|| {
            Error::Unsupported(format!("'{}' is not a relation property", field.name))
        })
    }

    pub(crate) fn related(
        &mut self,
        key: ModelKey,
        field: &'static FieldInfo,
    ) -> Result<Vec<ModelHandle>> {
        let relation = RelationTable::of(key.model, field)?;
        let target = Self::relation_target(field)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ? ORDER BY {}",
            quote_ident(&relation.other_column),
            quote_ident(&relation.table),
            quote_ident(&relation.self_column),
            id_column()
        );
        let rows = self.conn()?.query(&sql, &[Value::BigInt(key.id)])?;
        let ids: Vec<i64> = rows
            .iter()
            .filter_map(|row| row.get(0).and_then(Value::as_i64))
            .collect();
        Ok(ids
            .into_iter()
            .map(|id| self.arena.get_or_issue(target, id, &self.store))
            .collect())
    }

    pub(crate) fn relate(&mut self, key: ModelKey, field: &'static FieldInfo, other: i64) -> Result<()> {
        let relation = RelationTable::of(key.model, field)?;
        let conn = self.conn()?;
        let params = [Value::BigInt(key.id), Value::BigInt(other)];

        let existing = format!(
            "SELECT 1 FROM {} WHERE {} = ? AND {} = ?",
            quote_ident(&relation.table),
            quote_ident(&relation.self_column),
            quote_ident(&relation.other_column)
        );
        if !conn.query(&existing, &params)?.is_empty() {
            tracing::trace!(table = %relation.table, id = key.id, other, "already related");
            return Ok(());
        }

        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?, ?)",
            quote_ident(&relation.table),
            quote_ident(&relation.self_column),
            quote_ident(&relation.other_column)
        );
        conn.execute(&sql, &params)?;
        Ok(())
    }

    pub(crate) fn unrelate(
        &mut self,
        key: ModelKey,
        field: &'static FieldInfo,
        other: i64,
    ) -> Result<()> {
        let relation = RelationTable::of(key.model, field)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            quote_ident(&relation.table),
            quote_ident(&relation.self_column),
            quote_ident(&relation.other_column)
        );
        self.conn()?
            .execute(&sql, &[Value::BigInt(key.id), Value::BigInt(other)])?;
        Ok(())
    }

    pub(crate) fn clear_relation(&mut self, key: ModelKey, field: &'static FieldInfo) -> Result<()> {
        let relation = RelationTable::of(key.model, field)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(&relation.table),
            quote_ident(&relation.self_column)
        );
        self.conn()?.execute(&sql, &[Value::BigInt(key.id)])?;
        Ok(())
    }

    // ==================== Queries ====================

    pub(crate) fn fetch(&mut self, query: &CompiledQuery) -> Result<Vec<ModelHandle>> {
        self.ensure_registered(query.model)?;
        let rows = self.conn()?.query(&query.sql, &query.params)?;
        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.get_as::<i64>(0)?;
            handles.push(self.arena.get_or_issue(query.model, id, &self.store));
        }
        Ok(handles)
    }

    pub(crate) fn count(&mut self, query: &CompiledQuery) -> Result<usize> {
        self.ensure_registered(query.model)?;
        let sql = format!("SELECT COUNT(*) FROM ({})", query.sql);
        let rows = self.conn()?.query(&sql, &query.params)?;
        let count = match rows.first() {
            Some(row) => row.get_as::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ==================== Raw SQL and lifecycle ====================

    /// Run a raw statement; returns the number of rows it changed.
    pub(crate) fn execute_raw(&mut self, sql: &str) -> Result<u64> {
        let conn = self.conn()?;
        let before = conn.total_changes();
        conn.execute_raw(sql)?;
        Ok(u64::try_from(conn.total_changes() - before).unwrap_or(0))
    }

    /// Close the connection and invalidate every proxy. Idempotent.
    pub(crate) fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let evicted = self.arena.clear(StaleReason::Closed);
        self.registry.clear();
        tracing::debug!(evicted, "invalidated proxies on close");
        conn.close()
    }
}
