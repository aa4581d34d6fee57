//! Buffered document insertion
//!
//! The first document inserted into an empty collection defines its
//! attached layers; every later document must carry the same layers with the
//! same schema.

use std::collections::HashSet;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{LayerStoreError, Result};
use crate::model::{Document, LayerType};
use crate::query::SqlParam;
use crate::storage::Storage;
use crate::writer::{BufferedTableInsert, Cell};

use super::{Collection, LayerStructure, Structure};

/// Inserts documents into a collection table in multi-row batches
pub struct DocumentInserter {
    collection: Collection,
    writer: BufferedTableInsert<Storage>,
    registered: bool,
    inserted: u64,
}

impl std::fmt::Debug for DocumentInserter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentInserter")
            .field("collection", &self.collection.name())
            .field("inserted", &self.inserted)
            .field("buffered", &self.writer.buffered_rows())
            .finish()
    }
}

impl DocumentInserter {
    pub(crate) fn new(collection: Collection) -> Result<Self> {
        collection.ensure_registered()?;
        let structure = collection.structure();
        if let Some(layer) = structure.tabled_layers().into_iter().next() {
            return Err(LayerStoreError::StructureMismatch(format!(
                "cannot insert into collection {:?}: it already has detached layer {:?}",
                collection.name(),
                layer
            )));
        }
        let registered = !structure.attached_layers().is_empty() || !collection.is_empty()?;

        let mut columns = vec!["id".to_string(), "data".to_string()];
        columns.extend(collection.meta_columns().iter().map(|(c, _)| c.clone()));
        let storage = collection.storage().clone();
        let buffer_size = storage.config().insert_buffer_size;
        let query_length_limit = storage.config().query_length_limit;
        let writer = BufferedTableInsert::new(storage, collection.table(), columns, buffer_size, query_length_limit);

        Ok(Self {
            collection,
            writer,
            registered,
            inserted: 0,
        })
    }

    /// Buffer one document. `key` overrides the generated id; absent meta
    /// values get the column default.
    pub fn insert(&mut self, document: &Document, key: Option<i64>, meta: Option<&Map<String, Value>>) -> Result<()> {
        if let Some(meta) = meta {
            if let Some(unknown) = meta
                .keys()
                .find(|k| !self.collection.meta_columns().iter().any(|(c, _)| c == *k))
            {
                return Err(LayerStoreError::InvalidArgument(format!(
                    "collection {:?} has no meta column {:?}",
                    self.collection.name(),
                    unknown
                )));
            }
        }

        if !self.registered {
            self.register_layers(document)?;
        } else {
            self.check_layers(document)?;
        }

        let data = self.encode(document)?;
        let mut row = Vec::with_capacity(self.writer.columns().len());
        row.push(match key {
            Some(key) => Cell::from(SqlParam::Int(key)),
            None => Cell::Default,
        });
        row.push(Cell::from(SqlParam::Json(data.to_string())));

        for (column, meta_type) in self.collection.meta_columns() {
            row.push(match meta.and_then(|m| m.get(column)) {
                Some(value) => Cell::from(meta_type.to_param(column, value)?),
                None => Cell::Default,
            });
        }

        self.writer.insert(row)?;
        self.inserted += 1;
        Ok(())
    }

    /// Flush buffered documents
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    /// Flush and return the number of documents written
    pub fn close(self) -> Result<u64> {
        let collection = self.collection.name().to_string();
        let written = self.writer.close()?;
        info!(collection = %collection, documents = written, "inserter closed");
        Ok(written)
    }

    /// Attached layers are encoded with the tag stored in the structure
    fn encode(&self, document: &Document) -> Result<Value> {
        let structure = self.collection.structure();
        let registry = self.collection.storage().registry();
        let layers = document
            .layers()
            .iter()
            .map(|layer| {
                let tag = structure.serialisation_tag(&layer.name);
                registry.resolve(tag.as_deref())?.encode(layer)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(json!({
            "text": document.text,
            "meta": Value::Object(document.meta.clone()),
            "layers": layers,
        }))
    }

    fn register_layers(&mut self, document: &Document) -> Result<()> {
        let mut structure: Structure = self.collection.structure();
        let registry = self.collection.storage().registry();
        let mut added = Vec::with_capacity(document.layers().len());
        for layer in document.layers() {
            if let Some(tag) = &layer.serialisation_module {
                if !registry.contains(tag) {
                    return Err(LayerStoreError::UnknownSerializationModule(tag.clone()));
                }
            }
            let empty = layer.empty_copy();
            let described = structure.with_resolved_base(LayerStructure::from_layer(&empty, LayerType::Attached, Vec::new()));
            structure.insert(described.clone())?;
            added.push(described);
        }

        if !added.is_empty() {
            let storage = self.collection.storage();
            let schema = storage.schema().to_string();
            let name = self.collection.name().to_string();
            let version = self.collection.version();
            storage.transaction(|txn| {
                for layer in &added {
                    Structure::insert_row(txn, &schema, &name, version, layer)?;
                }
                Ok(())
            })?;
            self.collection.update_structure(|s| {
                *s = structure;
                Ok(())
            })?;
            debug!(collection = %name, layers = added.len(), "attached layers registered");
        }
        self.registered = true;
        Ok(())
    }

    fn check_layers(&self, document: &Document) -> Result<()> {
        let structure = self.collection.structure();
        let default_tag = self.collection.storage().registry().default_tag();
        let expected: HashSet<String> = structure.attached_layers().into_iter().collect();
        let actual: HashSet<String> = document.layer_names().into_iter().map(String::from).collect();
        if expected != actual {
            let mut expected: Vec<_> = expected.into_iter().collect();
            let mut actual: Vec<_> = actual.into_iter().collect();
            expected.sort();
            actual.sort();
            return Err(LayerStoreError::StructureMismatch(format!(
                "document layers {:?} differ from collection layers {:?}",
                actual, expected
            )));
        }
        for layer in document.layers() {
            let stored = structure.layer(&layer.name)?;
            let mut candidate = layer.empty_copy();
            if structure.version().has_global_serialisation() {
                candidate.serialisation_module = stored.serialisation_module.clone();
            }
            if !stored.describes(&candidate, default_tag) {
                return Err(LayerStoreError::StructureMismatch(format!(
                    "layer {:?} differs from the collection structure",
                    layer.name
                )));
            }
        }
        Ok(())
    }
}
