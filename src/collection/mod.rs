//! Collections
//!
//! A `Collection` is a handle to one registered collection: its document
//! table, its structure table and its layer tables.
//!
//! ## Responsibilities
//! - Cache the collection structure (reloaded on demand)
//! - Count, fetch and insert documents
//! - Create, fill and delete layers (see `layers`)
//! - Hand out subcollections for querying
//!
//! Existence is decided by the storage registry, never by probing tables.

mod insert;
mod layers;
mod meta;
mod structure;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{LayerStoreError, Result};
use crate::model::Document;
use crate::query::{qualified, QueryContext, Sql, SqlParam};
use crate::storage::naming::collection_index;
use crate::storage::{ops, Storage};
use crate::subcollection::Subcollection;

pub use insert::DocumentInserter;
pub use layers::{ngram_column, ngrams, CreateMode, LayerOptions};
pub use meta::{MetaColumns, MetaType};
pub use structure::{LayerStructure, Structure, StructureVersion};

/// Handle to a registered collection
///
/// Cloning is cheap; clones share the cached structure.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    name: String,
    storage: Storage,
    version: StructureVersion,
    structure: RwLock<Structure>,
    meta_columns: MetaColumns,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("layers", &self.inner.structure.read().layer_names())
            .finish()
    }
}

impl Collection {
    /// Handle for a collection that was just created (empty structure)
    pub(crate) fn created(storage: Storage, name: &str, version: StructureVersion, meta_columns: MetaColumns) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                name: name.to_string(),
                storage,
                version,
                structure: RwLock::new(Structure::empty(name, version)),
                meta_columns,
            }),
        }
    }

    /// Handle for an existing collection: load structure, discover meta columns
    pub(crate) fn open(storage: Storage, name: &str, version: StructureVersion) -> Result<Self> {
        let schema = storage.schema().to_string();
        let (structure, meta_columns) = storage.with_client(|client| {
            let structure = Structure::load(client, &schema, name, version)?;
            let rows = client.query(
                "SELECT column_name::text, data_type::text FROM information_schema.columns \
                 WHERE table_schema::text = $1 AND table_name::text = $2 AND column_name::text NOT IN ('id', 'data') \
                 ORDER BY ordinal_position",
                &[&schema, &name],
            )?;
            let mut meta_columns = Vec::with_capacity(rows.len());
            for row in rows {
                let column: String = row.try_get(0)?;
                let data_type: String = row.try_get(1)?;
                match MetaType::from_information_schema(&data_type) {
                    Some(meta_type) => meta_columns.push((column, meta_type)),
                    None => warn!(collection = name, column = %column, data_type = %data_type, "skipping meta column of unsupported type"),
                }
            }
            Ok((structure, meta_columns))
        })?;
        debug!(collection = name, layers = structure.layers().len(), "collection opened");

        Ok(Self {
            inner: Arc::new(CollectionInner {
                name: name.to_string(),
                storage,
                version,
                structure: RwLock::new(structure),
                meta_columns,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn version(&self) -> StructureVersion {
        self.inner.version
    }

    pub fn meta_columns(&self) -> &MetaColumns {
        &self.inner.meta_columns
    }

    /// Snapshot of the cached structure
    pub fn structure(&self) -> Structure {
        self.inner.structure.read().clone()
    }

    /// Re-read the structure table
    pub fn reload_structure(&self) -> Result<()> {
        let schema = self.storage().schema().to_string();
        let structure = self
            .storage()
            .with_client(|client| Structure::load(client, &schema, self.name(), self.version()))?;
        *self.inner.structure.write() = structure;
        Ok(())
    }

    pub(crate) fn update_structure<T>(&self, f: impl FnOnce(&mut Structure) -> Result<T>) -> Result<T> {
        f(&mut self.inner.structure.write())
    }

    /// True if the collection is still in the storage registry cache
    pub fn exists(&self) -> bool {
        self.storage().collection_exists(self.name())
    }

    /// Query context over the current structure
    pub fn context(&self) -> Arc<QueryContext> {
        Arc::new(QueryContext::new(
            self.storage().schema(),
            self.structure(),
            self.inner.meta_columns.clone(),
            self.storage().registry(),
        ))
    }

    pub(crate) fn table(&self) -> String {
        qualified(self.storage().schema(), self.name())
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Number of documents
    pub fn len(&self) -> Result<u64> {
        let row = self
            .storage()
            .query_one(&Sql::raw(format!("SELECT count(*) FROM {}", self.table())))?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fetch one document with all attached layers
    pub fn get(&self, id: i64) -> Result<Option<Document>> {
        let mut sql = Sql::raw(format!("SELECT data FROM {} WHERE id = ", self.table()));
        sql.push_param(SqlParam::Int(id));
        let rows = self.storage().query(&sql)?;
        let row = match rows.first() {
            Some(row) => row,
            None => return Ok(None),
        };
        let data: serde_json::Value = row.try_get(0)?;
        let structure = self.inner.structure.read();
        let document = self
            .storage()
            .registry()
            .decode_document(&data, |name| structure.serialisation_tag(name))?;
        Ok(Some(document))
    }

    /// Subcollection over every document with all attached layers
    pub fn select(&self) -> Subcollection {
        Subcollection::new(self.clone(), self.structure().attached_layers())
    }

    /// Buffered document inserter
    pub fn insert(&self) -> Result<DocumentInserter> {
        DocumentInserter::new(self.clone())
    }

    /// Deregister the collection and drop its tables
    pub fn delete(&self, cascade: bool) -> Result<()> {
        self.storage().delete_collection(self.name(), cascade)
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    /// GIN index over the attached layers
    pub fn create_index(&self) -> Result<()> {
        let schema = self.storage().schema().to_string();
        self.storage()
            .transaction(|txn| ops::create_collection_index(txn, &schema, self.name()))
    }

    pub fn drop_index(&self) -> Result<()> {
        let schema = self.storage().schema().to_string();
        self.storage()
            .transaction(|txn| ops::drop_index(txn, &schema, &collection_index(self.name())))
    }

    pub(crate) fn ensure_registered(&self) -> Result<()> {
        if !self.storage().is_registered(self.name())? {
            return Err(LayerStoreError::CollectionGone(self.name().to_string()));
        }
        Ok(())
    }
}
