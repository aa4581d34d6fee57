//! Storage Manager
//!
//! Owns the database connection and the collections registry.
//!
//! ## Responsibilities
//! - Connect and make sure the schema and registry table exist
//! - Keep a cache of registered collections (re-read on `refresh`)
//! - Create and delete collections inside the registry critical section
//! - Hand out cursor names and run statements for collections/iterators
//!
//! ## Registry critical section
//!
//! ```text
//! BEGIN
//!   LOCK TABLE "<schema>"."__collections" IN EXCLUSIVE MODE
//!   re-read registry          ← detects collections created by others
//!   check-then-act            ← insert / delete registry row, DDL
//! COMMIT                      (any error: ROLLBACK, lock released)
//! ```
//!
//! The lock is the single point of serialization between processes. It is
//! held only for registry mutations, never while layers are being tagged.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use postgres::{Client, GenericClient, NoTls, Row, Transaction};
use tracing::{debug, info};

use crate::collection::{Collection, MetaColumns, StructureVersion};
use crate::config::Config;
use crate::error::{LayerStoreError, Result};
use crate::query::{qualified, Sql};
use crate::serialization::SerializationRegistry;
use crate::writer::InsertExecutor;

use super::naming::{
    layer_table, fragment_table, structure_table, validate_collection_name, validate_column_name, REGISTRY_TABLE,
};
use super::ops;

/// Options for a new collection
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    /// Table comment; defaults to "created by <user> on <time>"
    pub description: Option<String>,
    /// Meta columns of the document table
    pub meta: MetaColumns,
    /// Structure table generation (current by default)
    pub version: StructureVersion,
}

impl CollectionOptions {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn meta(mut self, meta: MetaColumns) -> Self {
        self.meta = meta;
        self
    }

    pub fn version(mut self, version: StructureVersion) -> Self {
        self.version = version;
        self
    }
}

/// Handle to a layerstore schema
///
/// ## Concurrency:
/// - `client`: one connection behind a Mutex, locked per statement or transaction
/// - `collections`: registry cache behind a RwLock
/// - `next_cursor_id`: atomic counter
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    config: Config,
    client: Mutex<Option<Client>>,
    registry: SerializationRegistry,
    collections: RwLock<BTreeMap<String, StructureVersion>>,
    next_cursor_id: AtomicU64,
    user: String,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("schema", &self.inner.config.schema)
            .field("user", &self.inner.user)
            .finish()
    }
}

impl Storage {
    /// Connect with the built-in serialization modules
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_registry(config, SerializationRegistry::default())
    }

    /// Connect with an explicit serialization registry
    ///
    /// 1. Connect (failures are `Connection` errors)
    /// 2. Assume the configured role
    /// 3. Check (or create) the schema and the registry table
    /// 4. Read the registry
    pub fn open_with_registry(config: Config, registry: SerializationRegistry) -> Result<Self> {
        let pg_config = config.to_postgres_config()?;
        let mut client = pg_config
            .connect(NoTls)
            .map_err(|e| LayerStoreError::Connection(e.to_string()))?;

        if let Some(role) = &config.role {
            client.batch_execute(&format!("SET ROLE {}", crate::query::quote_ident(role)))?;
        }
        let user: String = client.query_one("SELECT current_user::text", &[])?.try_get(0)?;
        ensure_schema(&mut client, &config)?;
        info!(schema = %config.schema, user = %user, "connected to storage");

        let storage = Self {
            inner: Arc::new(StorageInner {
                config,
                client: Mutex::new(Some(client)),
                registry,
                collections: RwLock::new(BTreeMap::new()),
                next_cursor_id: AtomicU64::new(0),
                user,
            }),
        };
        storage.refresh()?;
        Ok(storage)
    }

    /// Close the connection; later calls fail with `Connection`
    pub fn close(&self) -> Result<()> {
        if let Some(client) = self.inner.client.lock().take() {
            client.close()?;
            info!(schema = %self.schema(), "storage closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.client.lock().is_none()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn schema(&self) -> &str {
        &self.inner.config.schema
    }

    pub fn user(&self) -> &str {
        &self.inner.user
    }

    pub fn registry(&self) -> &SerializationRegistry {
        &self.inner.registry
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Registered collection names (cached)
    pub fn collections(&self) -> Vec<String> {
        self.inner.collections.read().keys().cloned().collect()
    }

    /// True if `name` is in the registry cache
    pub fn collection_exists(&self, name: &str) -> bool {
        self.inner.collections.read().contains_key(name)
    }

    /// Structure version of a registered collection (cached)
    pub(crate) fn collection_version(&self, name: &str) -> Option<StructureVersion> {
        self.inner.collections.read().get(name).copied()
    }

    /// Ask the database whether `name` is still registered
    pub fn is_registered(&self, name: &str) -> Result<bool> {
        let statement = format!(
            "SELECT 1 FROM {} WHERE collection = $1",
            qualified(self.schema(), REGISTRY_TABLE)
        );
        let rows = self.with_client(|client| Ok(client.query(statement.as_str(), &[&name])?))?;
        Ok(!rows.is_empty())
    }

    /// Re-read the registry in a short transaction of its own
    pub fn refresh(&self) -> Result<()> {
        self.with_client(|client| {
            let mut txn = client.transaction()?;
            self.refresh_in(&mut txn)?;
            txn.commit()?;
            Ok(())
        })
    }

    /// Re-read the registry inside the caller's transaction (no commit, no rollback)
    pub fn refresh_in<C: GenericClient>(&self, client: &mut C) -> Result<()> {
        let statement = format!(
            "SELECT collection, version FROM {}",
            qualified(self.schema(), REGISTRY_TABLE)
        );
        let mut collections = BTreeMap::new();
        for row in client.query(statement.as_str(), &[])? {
            let name: String = row.try_get(0)?;
            let version: String = row.try_get(1)?;
            collections.insert(name, version.parse()?);
        }
        debug!(count = collections.len(), "registry refreshed");
        *self.inner.collections.write() = collections;
        Ok(())
    }

    /// Open a registered collection
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        if !self.collection_exists(name) {
            self.refresh()?;
        }
        let version = self
            .collection_version(name)
            .ok_or_else(|| LayerStoreError::UnknownCollection(name.to_string()))?;
        Collection::open(self.clone(), name, version)
    }

    /// Register a collection and create its structure and document tables
    pub fn add_collection(&self, name: &str, options: CollectionOptions) -> Result<Collection> {
        validate_collection_name(name)?;
        for (column, _) in &options.meta {
            validate_column_name(column)?;
        }
        let schema = self.schema().to_string();
        let version = options.version;

        self.with_registry_lock("add_collection", |txn| {
            if self.collection_exists(name) {
                return Err(LayerStoreError::AlreadyExists(format!("collection {:?}", name)));
            }
            let description = match &options.description {
                Some(description) => description.clone(),
                None => {
                    let now: String = txn
                        .query_one("SELECT to_char(now(), 'Dy, DD Mon YYYY HH24:MI:SS')", &[])?
                        .try_get(0)?;
                    format!("created by {} on {}", self.user(), now)
                }
            };
            txn.execute(
                format!(
                    "INSERT INTO {} (collection, version) VALUES ($1, $2)",
                    qualified(&schema, REGISTRY_TABLE)
                )
                .as_str(),
                &[&name, &version.as_str()],
            )?;
            crate::collection::Structure::create_table(txn, &schema, name, version)?;
            ops::create_collection_table(txn, &schema, name, &options.meta, &description)?;
            Ok(())
        })?;

        self.inner
            .collections
            .write()
            .insert(name.to_string(), version);
        info!(collection = name, version = %version, "collection created");
        Ok(Collection::created(self.clone(), name, version, options.meta))
    }

    /// Deregister a collection, then drop its tables.
    ///
    /// The registry row is removed (and committed) first, so other processes
    /// see the collection as gone while the tables are still being dropped.
    pub fn delete_collection(&self, name: &str, cascade: bool) -> Result<()> {
        let schema = self.schema().to_string();
        let structure = self.with_registry_lock("delete_collection", |txn| {
            let version = self
                .collection_version(name)
                .ok_or_else(|| LayerStoreError::UnknownCollection(name.to_string()))?;
            let structure = crate::collection::Structure::load(txn, &schema, name, version)?;
            txn.execute(
                format!("DELETE FROM {} WHERE collection = $1", qualified(&schema, REGISTRY_TABLE)).as_str(),
                &[&name],
            )?;
            Ok(structure)
        })?;
        self.inner.collections.write().remove(name);

        self.transaction(|txn| {
            for layer in structure.layers().iter().rev() {
                let table = match layer.layer_type {
                    crate::model::LayerType::Attached => continue,
                    crate::model::LayerType::Fragmented => fragment_table(name, &layer.name),
                    _ => layer_table(name, &layer.name),
                };
                ops::drop_table(txn, &schema, &table, cascade)?;
            }
            ops::drop_table(txn, &schema, &structure_table(name), cascade)?;
            ops::drop_table(txn, &schema, name, cascade)?;
            Ok(())
        })?;
        info!(collection = name, cascade, "collection deleted");
        Ok(())
    }

    /// Drop the schema with every collection in it
    pub fn delete_schema(&self) -> Result<()> {
        let statement = format!("DROP SCHEMA {} CASCADE", crate::query::quote_ident(self.schema()));
        self.with_client(|client| {
            debug!(sql = %statement, "executing");
            client.batch_execute(&statement)?;
            Ok(())
        })?;
        self.inner.collections.write().clear();
        info!(schema = %self.schema(), "schema deleted");
        Ok(())
    }

    // =========================================================================
    // Statement helpers
    // =========================================================================

    /// Run `f` with exclusive use of the connection
    pub(crate) fn with_client<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Client) -> Result<T>,
    {
        let mut guard = self.inner.client.lock();
        let client = guard
            .as_mut()
            .ok_or_else(|| LayerStoreError::Connection("storage is closed".into()))?;
        f(client)
    }

    /// Run `f` in a transaction; commit on success, roll back on error
    pub(crate) fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        self.with_client(|client| {
            let mut txn = client.transaction()?;
            let value = f(&mut txn)?;
            txn.commit()?;
            Ok(value)
        })
    }

    /// Registry critical section (see module docs)
    pub(crate) fn with_registry_lock<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let lock = format!(
            "LOCK TABLE {} IN EXCLUSIVE MODE",
            qualified(self.schema(), REGISTRY_TABLE)
        );
        self.transaction(|txn| {
            debug!(operation, "acquiring registry lock");
            txn.batch_execute(&lock)?;
            self.refresh_in(txn)?;
            f(txn)
        })
        .map_err(|e| match e {
            LayerStoreError::Database(source) => LayerStoreError::Registry {
                operation: operation.to_string(),
                source,
            },
            other => other,
        })
    }

    pub(crate) fn query(&self, sql: &Sql) -> Result<Vec<Row>> {
        let statement = sql.render();
        debug!(sql = %statement, params = sql.params().len(), "query");
        self.with_client(|client| Ok(client.query(statement.as_str(), &sql.bind_params())?))
    }

    pub(crate) fn query_one(&self, sql: &Sql) -> Result<Row> {
        let statement = sql.render();
        debug!(sql = %statement, params = sql.params().len(), "query");
        self.with_client(|client| Ok(client.query_one(statement.as_str(), &sql.bind_params())?))
    }

    /// Unique server-side cursor name for this storage instance
    pub(crate) fn next_cursor_name(&self) -> String {
        let id = self.inner.next_cursor_id.fetch_add(1, Ordering::Relaxed);
        format!("layerstore_cursor_{}", id)
    }
}

impl InsertExecutor for Storage {
    /// One multi-row insert, committed on its own
    fn execute_insert(&self, sql: &Sql) -> Result<u64> {
        let statement = sql.render();
        debug!(params = sql.params().len(), length = statement.len(), "flushing insert");
        self.transaction(|txn| Ok(txn.execute(statement.as_str(), &sql.bind_params())?))
    }
}

/// Check the schema and registry table, creating them if allowed
fn ensure_schema(client: &mut Client, config: &Config) -> Result<()> {
    let schema = config.schema.as_str();
    let schema_exists: bool = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name::text = $1)",
            &[&schema],
        )?
        .try_get(0)?;
    let registry_exists: bool = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema::text = $1 AND table_name::text = $2)",
            &[&schema, &REGISTRY_TABLE],
        )?
        .try_get(0)?;

    if schema_exists && registry_exists {
        return Ok(());
    }
    if !config.create_schema_if_missing {
        return Err(LayerStoreError::SchemaMissing(schema.to_string()));
    }

    let mut txn = client.transaction()?;
    if !schema_exists {
        ops::create_schema(&mut txn, schema)?;
    }
    ops::create_registry_table(&mut txn, schema)?;
    txn.commit()?;
    info!(schema, "created schema and collection registry");
    Ok(())
}
