//! Tagging a subcollection into a detached layer
//!
//! ```text
//!   cursor ──▶ Record ──tagger──▶ Layer ──encode──▶ row ──▶ BufferedTableInsert
//!                                   │                         │ flush = commit
//!                          status map → meta cells            ▼
//!                          spans      → n-gram cells    <c>__<l>__layer
//! ```
//!
//! Rows are committed one flush at a time. A document counts as tagged as
//! soon as its row exists, so an interrupted `append` run resumes where the
//! last successful flush ended.

use serde_json::Map;
use tracing::{info, warn};

use crate::collection::{ngram_column, ngrams, CreateMode, LayerOptions};
use crate::error::{LayerStoreError, Result};
use crate::model::LayerType;
use crate::query::{Filter, SqlParam};
use crate::tagger::Tagger;
use crate::writer::{BufferedTableInsert, Cell};

use super::Subcollection;

impl Subcollection {
    /// Tag the selected documents and store the output as a detached layer.
    ///
    /// The tagger's input layers are added to the selection. With
    /// `CreateMode::Append` only documents without a row are tagged.
    pub fn create_layer(&self, tagger: &dyn Tagger, options: LayerOptions) -> Result<u64> {
        let template = tagger.template();
        let name = template.name.clone();
        let structure = self.collection.structure();
        self.check_inputs(tagger, &name)?;

        match options.mode {
            CreateMode::New => {
                if structure.has_layer(&name) {
                    return Err(LayerStoreError::AlreadyExists(format!(
                        "layer {:?} in collection {:?}",
                        name,
                        self.collection.name()
                    )));
                }
            }
            CreateMode::Append => {
                let existing = structure.layer(&name)?;
                if !existing.is_sparse() {
                    return Err(LayerStoreError::InvalidArgument(format!(
                        "cannot append to layer {:?}: only sparse layers can be appended to",
                        name
                    )));
                }
                let default_tag = self.collection.storage().registry().default_tag();
                if !existing.describes(&template, default_tag) {
                    return Err(LayerStoreError::StructureMismatch(format!(
                        "tagger output does not match the stored layer {:?}",
                        name
                    )));
                }
            }
            CreateMode::Overwrite => {
                if structure.has_layer(&name) {
                    self.collection.delete_layer(&name, true)?;
                }
            }
        }

        if options.mode != CreateMode::Append {
            self.collection.add_layer(&template, options.layer_type(), &options)?;
        }

        let result = self
            .tagging_source(tagger, &name, options.mode == CreateMode::Append, None)
            .and_then(|source| source.fill_layer(tagger, &name));

        if result.is_err() && options.mode != CreateMode::Append {
            if let Err(e) = self.collection.delete_layer(&name, true) {
                warn!(layer = %name, error = %e, "failed to remove partially created layer");
            }
        }
        result
    }

    /// Tag the documents with `id % modulus == remainder` into an existing layer.
    ///
    /// Lets one long tagging job be split over several processes. The layer
    /// table must already exist (see `Collection::add_layer`).
    pub fn create_layer_block(&self, tagger: &dyn Tagger, block: (i64, i64), mode: CreateMode) -> Result<u64> {
        let name = tagger.output_layer();
        let structure = self.collection.structure();
        let existing = structure.layer(&name)?;
        if !existing.layer_type.is_joined() {
            return Err(LayerStoreError::UnsupportedLayerType {
                layer: name.clone(),
                layer_type: existing.layer_type.to_string(),
            });
        }
        if mode == CreateMode::Overwrite {
            return Err(LayerStoreError::InvalidArgument(
                "overwrite is not supported for block tagging".into(),
            ));
        }
        let default_tag = self.collection.storage().registry().default_tag();
        if !existing.describes(&tagger.template(), default_tag) {
            return Err(LayerStoreError::StructureMismatch(format!(
                "tagger output does not match the stored layer {:?}",
                name
            )));
        }
        self.check_inputs(tagger, &name)?;

        let source = self.tagging_source(tagger, &name, mode == CreateMode::Append, Some(block))?;
        source.fill_layer(tagger, &name)
    }

    fn check_inputs(&self, tagger: &dyn Tagger, name: &str) -> Result<()> {
        let structure = self.collection.structure();
        for input in tagger.input_layers() {
            if !structure.has_layer(&input) {
                return Err(LayerStoreError::MissingDependency {
                    layer: name.to_string(),
                    dependency: input,
                });
            }
        }
        Ok(())
    }

    /// Subcollection to read from: inputs selected, target layer not selected
    fn tagging_source(
        &self,
        tagger: &dyn Tagger,
        target: &str,
        untagged_only: bool,
        block: Option<(i64, i64)>,
    ) -> Result<Subcollection> {
        let structure = self.collection.structure();
        let mut layers: Vec<String> = self
            .plan
            .layers()
            .iter()
            .filter(|l| l.as_str() != target && structure.has_layer(l))
            .cloned()
            .collect();
        for input in tagger.input_layers() {
            if !layers.contains(&input) {
                layers.push(input);
            }
        }

        let context = self.collection.context();
        let mut filter: Option<Filter> = None;
        if untagged_only {
            filter = Some(Filter::missing_layer(&context, target)?);
        }
        if let Some((modulus, remainder)) = block {
            let shard = Filter::block(&context, modulus, remainder)?;
            filter = Some(match filter {
                Some(f) => f.and(&shard)?,
                None => shard,
            });
        }
        self.select(filter.as_ref(), Some(layers))
    }

    fn fill_layer(&self, tagger: &dyn Tagger, name: &str) -> Result<u64> {
        let collection = &self.collection;
        let structure = collection.structure();
        let layer = structure.layer(name)?;
        if layer.layer_type == LayerType::Fragmented {
            return Err(LayerStoreError::UnsupportedLayerType {
                layer: name.to_string(),
                layer_type: layer.layer_type.to_string(),
            });
        }
        let sparse = layer.is_sparse();
        let table = collection.context().layer_table(name)?;
        let (meta_columns, ngram_columns) = collection.layer_table_columns(name)?;

        let mut columns = vec!["text_id".to_string(), "data".to_string()];
        columns.extend(meta_columns.iter().map(|(c, _)| c.clone()));
        columns.extend(ngram_columns.iter().map(|(a, n)| ngram_column(a, *n)));

        let storage = collection.storage();
        let config = storage.config();
        let mut writer = BufferedTableInsert::new(
            storage,
            table,
            columns,
            config.insert_buffer_size,
            config.query_length_limit,
        );

        let registry = storage.registry();
        let mut status = Map::new();
        let mut documents = 0u64;
        for record in self.iter()? {
            let record = record?;
            documents += 1;
            status.clear();
            let output = tagger.make_layer(&record.document, &mut status)?;
            if output.name != name {
                return Err(LayerStoreError::StructureMismatch(format!(
                    "tagger produced layer {:?}, expected {:?}",
                    output.name, name
                )));
            }
            if sparse && output.is_empty() {
                continue;
            }

            let payload = registry.encode_layer(&output)?;
            let mut row = Vec::with_capacity(writer.columns().len());
            row.push(Cell::from(SqlParam::Int(record.id)));
            row.push(Cell::from(SqlParam::Json(payload.to_string())));
            for (column, meta_type) in &meta_columns {
                row.push(match status.get(column) {
                    Some(value) => Cell::from(meta_type.to_param(column, value)?),
                    None => Cell::Default,
                });
            }
            for (attribute, n) in &ngram_columns {
                row.push(Cell::from(SqlParam::TextArray(ngrams(&output, attribute, *n))));
            }
            writer.insert(row)?;
        }

        let written = writer.close()?;
        info!(
            collection = collection.name(),
            layer = name,
            documents = documents,
            rows = written,
            "layer filled"
        );
        Ok(written)
    }
}
