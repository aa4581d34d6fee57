//! Layer tables: creation, deletion and n-gram fingerprints

use serde_json::Value;
use tracing::info;

use crate::error::{LayerStoreError, Result};
use crate::model::{Layer, LayerType};
use crate::storage::naming::{fragment_table, layer_table, validate_column_name, validate_layer_name};
use crate::storage::ops;
use crate::tagger::Tagger;

use super::{Collection, LayerStructure, MetaColumns, MetaType, Structure};

/// What to do when the target layer already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// Fail with `AlreadyExists`
    #[default]
    New,
    /// Tag only documents without a row (sparse layers only)
    Append,
    /// Delete the layer and its dependents, then create it again
    ///
    /// The old rows are gone before tagging starts. If tagging fails, the
    /// partially written new layer is deleted as well, leaving no layer of
    /// that name.
    Overwrite,
}

/// Options for creating a detached layer
#[derive(Debug, Clone, Default)]
pub struct LayerOptions {
    pub mode: CreateMode,
    pub sparse: bool,
    /// Meta columns of the layer table, filled from the tagger's status map
    pub meta: MetaColumns,
    /// `(attribute, n)` pairs; each gets an indexed n-gram column
    pub ngram_index: Vec<(String, usize)>,
    /// GIN index on the layer data
    pub create_index: bool,
}

impl LayerOptions {
    pub fn mode(mut self, mode: CreateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn meta(mut self, meta: MetaColumns) -> Self {
        self.meta = meta;
        self
    }

    pub fn ngram_index(mut self, attribute: impl Into<String>, n: usize) -> Self {
        self.ngram_index.push((attribute.into(), n));
        self
    }

    pub fn create_index(mut self, create_index: bool) -> Self {
        self.create_index = create_index;
        self
    }

    pub(crate) fn layer_type(&self) -> LayerType {
        if self.sparse {
            LayerType::Sparse
        } else {
            LayerType::Detached
        }
    }
}

/// Name of the n-gram column for `attribute`
pub fn ngram_column(attribute: &str, n: usize) -> String {
    format!("{}_ngram_{}", attribute, n)
}

fn parse_ngram_column(column: &str) -> Option<(String, usize)> {
    let (attribute, n) = column.rsplit_once("_ngram_")?;
    Some((attribute.to_string(), n.parse().ok()?))
}

/// Distinct n-grams over the first annotation's `attribute` values, tokens joined with `-`
pub fn ngrams(layer: &Layer, attribute: &str, n: usize) -> Vec<String> {
    let index = match layer.attribute_index(attribute) {
        Some(index) if n > 0 => index,
        _ => return Vec::new(),
    };
    let tokens: Vec<String> = layer
        .spans()
        .iter()
        .filter_map(|span| span.annotations.first())
        .filter_map(|a| a.value(index))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();

    let mut grams: Vec<String> = tokens.windows(n).map(|w| w.join("-")).collect();
    grams.sort();
    grams.dedup();
    grams
}

impl Collection {
    /// Create an empty detached, sparse or fragmented layer table and
    /// register it in the structure
    pub fn add_layer(&self, template: &Layer, layer_type: LayerType, options: &LayerOptions) -> Result<LayerStructure> {
        validate_layer_name(self.name(), &template.name)?;
        if layer_type == LayerType::Attached {
            return Err(LayerStoreError::InvalidArgument(format!(
                "attached layer {:?} can only be added by inserting documents",
                template.name
            )));
        }
        for (column, _) in &options.meta {
            validate_column_name(column)?;
        }
        let mut ngram_columns = Vec::with_capacity(options.ngram_index.len());
        for (attribute, n) in &options.ngram_index {
            if template.attribute_index(attribute).is_none() || *n == 0 {
                return Err(LayerStoreError::InvalidArgument(format!(
                    "invalid n-gram index ({:?}, {}) for layer {:?}",
                    attribute, n, template.name
                )));
            }
            let column = ngram_column(attribute, *n);
            validate_column_name(&column)?;
            ngram_columns.push(column);
        }
        if let Some(tag) = &template.serialisation_module {
            if !self.storage().registry().contains(tag) {
                return Err(LayerStoreError::UnknownSerializationModule(tag.clone()));
            }
        }

        let structure = self.structure();
        let meta_names = options.meta.iter().map(|(c, _)| c.clone()).collect();
        let layer = structure.with_resolved_base(LayerStructure::from_layer(template, layer_type, meta_names));
        structure.validate_new_layer(&layer)?;

        let schema = self.storage().schema().to_string();
        let table = table_for(self.name(), &layer.name, layer_type);
        self.storage().transaction(|txn| {
            ops::create_layer_table(
                txn,
                &schema,
                self.name(),
                &table,
                layer_type == LayerType::Fragmented,
                &options.meta,
                &ngram_columns,
            )?;
            Structure::insert_row(txn, &schema, self.name(), self.version(), &layer)?;
            if options.create_index {
                ops::create_layer_data_index(txn, &schema, &table)?;
            }
            for column in &ngram_columns {
                ops::create_ngram_index(txn, &schema, &table, column)?;
            }
            Ok(())
        })?;

        self.update_structure(|s| s.insert(layer.clone()))?;
        info!(collection = self.name(), layer = %layer.name, layer_type = %layer_type, "layer added");
        Ok(layer)
    }

    /// Delete a detached layer. With `cascade`, dependent layers go first;
    /// without it a dependent layer is an error.
    pub fn delete_layer(&self, name: &str, cascade: bool) -> Result<()> {
        let structure = self.structure();
        let layer = structure.layer(name)?;
        if layer.layer_type == LayerType::Attached {
            return Err(LayerStoreError::InvalidArgument(format!(
                "attached layer {:?} cannot be deleted",
                name
            )));
        }

        let doomed = if cascade {
            structure.deletion_order(name)?
        } else {
            if let Some(dependent) = structure.dependents_of(name).into_iter().next() {
                return Err(LayerStoreError::HasDependents {
                    layer: name.to_string(),
                    dependent,
                });
            }
            vec![name.to_string()]
        };
        let mut tables = Vec::with_capacity(doomed.len());
        for layer_name in &doomed {
            let layer_type = structure.layer_type(layer_name)?;
            if layer_type == LayerType::Attached {
                return Err(LayerStoreError::HasDependents {
                    layer: name.to_string(),
                    dependent: layer_name.clone(),
                });
            }
            tables.push((layer_name.clone(), table_for(self.name(), layer_name, layer_type)));
        }

        let schema = self.storage().schema().to_string();
        self.storage().transaction(|txn| {
            for (layer_name, table) in &tables {
                ops::drop_table(txn, &schema, table, false)?;
                Structure::delete_row(txn, &schema, self.name(), layer_name)?;
            }
            Ok(())
        })?;

        self.update_structure(|s| {
            for layer_name in &doomed {
                s.remove(layer_name)?;
            }
            Ok(())
        })?;
        info!(collection = self.name(), layer = name, deleted = doomed.len(), "layer deleted");
        Ok(())
    }

    /// Tag every document and store the output as a new detached layer
    pub fn create_layer(&self, tagger: &dyn Tagger, options: LayerOptions) -> Result<u64> {
        self.select().create_layer(tagger, options)
    }

    /// Tag the documents with `id % modulus == remainder` into an existing layer
    pub fn create_layer_block(&self, tagger: &dyn Tagger, block: (i64, i64), mode: CreateMode) -> Result<u64> {
        self.select().create_layer_block(tagger, block, mode)
    }

    /// Meta columns (with types) and n-gram columns of a layer table
    pub(crate) fn layer_table_columns(&self, layer: &str) -> Result<(MetaColumns, Vec<(String, usize)>)> {
        let structure = self.structure();
        let layer = structure.layer(layer)?;
        let table = table_for(self.name(), &layer.name, layer.layer_type);
        let schema = self.storage().schema().to_string();

        let rows = self.storage().with_client(|client| {
            Ok(client.query(
                "SELECT column_name::text, data_type::text FROM information_schema.columns \
                 WHERE table_schema::text = $1 AND table_name::text = $2 ORDER BY ordinal_position",
                &[&schema, &table],
            )?)
        })?;

        let mut meta = Vec::new();
        let mut ngram = Vec::new();
        for row in rows {
            let column: String = row.try_get(0)?;
            let data_type: String = row.try_get(1)?;
            if data_type == "ARRAY" {
                if let Some(parsed) = parse_ngram_column(&column) {
                    ngram.push(parsed);
                }
            } else if layer.meta.contains(&column) {
                let meta_type = MetaType::from_information_schema(&data_type).ok_or_else(|| {
                    LayerStoreError::StructureMismatch(format!(
                        "meta column {:?} of {:?} has unsupported type {}",
                        column, table, data_type
                    ))
                })?;
                meta.push((column, meta_type));
            }
        }
        Ok((meta, ngram))
    }
}

fn table_for(collection: &str, layer: &str, layer_type: LayerType) -> String {
    match layer_type {
        LayerType::Fragmented => fragment_table(collection, layer),
        _ => layer_table(collection, layer),
    }
}
