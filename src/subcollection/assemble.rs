//! Row decoding: joined rows back into documents
//!
//! ```text
//! row:  id | data | l1__id | l1__data | l2__id | l2__data | meta..
//!            │        └───────┬────────┘
//!            ▼                ▼
//!   attached layers    detached layers, in reconstruction order;
//!   (inline payload)   NULL for a sparse layer → empty template
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use postgres::Row;
use serde_json::{Map, Value};

use crate::error::{LayerStoreError, Result};
use crate::model::{Document, Layer, LayerType};
use crate::query::{QueryContext, SelectedColumns, SparsePolicy};
use crate::serialization::SerializationRegistry;

use super::plan::ResolvedPlan;

/// One document of a subcollection
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: i64,
    pub document: Document,
    /// Requested meta columns of the document row
    pub meta: Map<String, Value>,
}

pub(crate) struct RowAssembler {
    context: Arc<QueryContext>,
    registry: SerializationRegistry,
    /// Layers to keep, in reconstruction order
    layers: Vec<String>,
    keep: HashSet<String>,
    columns: SelectedColumns,
    sparse_policy: SparsePolicy,
    templates: HashMap<String, Layer>,
}

impl RowAssembler {
    pub(crate) fn new(
        context: Arc<QueryContext>,
        registry: SerializationRegistry,
        plan: &ResolvedPlan,
        sparse_policy: SparsePolicy,
    ) -> Self {
        let templates = plan
            .layers
            .iter()
            .filter_map(|name| context.structure().get(name))
            .filter(|l| l.is_sparse())
            .map(|l| (l.name.clone(), l.template().clone()))
            .collect();
        Self {
            keep: plan.layers.iter().cloned().collect(),
            layers: plan.layers.clone(),
            columns: plan.columns.clone(),
            context,
            registry,
            sparse_policy,
            templates,
        }
    }

    pub(crate) fn assemble(&self, row: &Row) -> Result<Record> {
        if row.len() != self.columns.width() {
            return Err(LayerStoreError::StructureMismatch(format!(
                "row has {} columns, expected {}",
                row.len(),
                self.columns.width()
            )));
        }
        let id: i64 = row.try_get(0)?;
        let data: Value = row.try_get(1)?;
        let mut document = self.decode_attached(&data)?;

        let structure = self.context.structure();
        let joined = self.columns.layers();
        for layer_name in &self.layers {
            let layer = structure.layer(layer_name)?;
            if layer.layer_type == LayerType::Attached {
                continue;
            }
            let index = self
                .columns
                .layer_data_index(layer_name)
                .ok_or_else(|| LayerStoreError::unknown_layer(structure.collection(), layer_name))?;
            let payload: Option<Value> = row.try_get(index)?;
            match payload {
                Some(payload) => {
                    let tag = structure.serialisation_tag(layer_name);
                    let decoded = self.registry.decode_layer(tag.as_deref(), &payload, &document)?;
                    document.add_layer(decoded)?;
                }
                None if layer.is_sparse() => match self.sparse_policy {
                    SparsePolicy::KeepAsTemplate => {
                        if let Some(template) = self.templates.get(layer_name) {
                            document.add_layer(template.clone())?;
                        }
                    }
                    SparsePolicy::KeepAsNull | SparsePolicy::Drop => {}
                },
                None => {
                    return Err(LayerStoreError::StructureMismatch(format!(
                        "document {} has no row for detached layer {:?}",
                        id, layer_name
                    )))
                }
            }
        }

        let mut meta = Map::new();
        let offset = 2 + 2 * joined.len();
        for (i, column) in self.columns.meta().iter().enumerate() {
            let value: Option<Value> = row.try_get(offset + i)?;
            meta.insert(column.clone(), value.unwrap_or(Value::Null));
        }

        Ok(Record { id, document, meta })
    }

    /// Decode the document row, keeping only the selected attached layers
    fn decode_attached(&self, data: &Value) -> Result<Document> {
        let structure = self.context.structure();
        let (text, meta, layers) = self
            .registry
            .decode_document(data, |name| structure.serialisation_tag(name))?
            .into_parts();
        let mut kept = Document::new(text).with_meta(meta);
        for layer in layers {
            if self.keep.contains(&layer.name) {
                kept.add_layer(layer)?;
            }
        }
        Ok(kept)
    }
}
