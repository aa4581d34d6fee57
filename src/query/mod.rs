//! Query Composition Layer
//!
//! Three builders combined by the subcollection iterator:
//!
//! ```text
//!  Filter ──────────┐     WHERE <boolean tree of predicates>
//!  JoinClause ──────┼──►  FROM c [LEFT] JOIN l ON c."id" = l."text_id"
//!  SelectedColumns ─┘     SELECT id, data, <layer>__id, <layer>__data, meta..
//! ```
//!
//! All three are rendered against a `QueryContext`: a snapshot of the
//! collection's structure and meta columns taken when the query is built.

mod filter;
mod join;
mod projection;
mod sql;

use std::collections::HashSet;

use crate::collection::{MetaColumns, MetaType, Structure};
use crate::error::{LayerStoreError, Result};
use crate::model::LayerType;
use crate::serialization::SerializationRegistry;
use crate::storage::naming::{fragment_table, layer_table};

pub use filter::{CompareOp, Filter};
pub use join::{JoinClause, JoinKind, SparsePolicy};
pub use projection::SelectedColumns;
pub use sql::{escape_like, qualified, quote_ident, quote_literal, Sql, SqlParam};

/// Snapshot of a collection used to render queries
#[derive(Debug, Clone)]
pub struct QueryContext {
    schema: String,
    structure: Structure,
    meta_columns: MetaColumns,
    default_layout: HashSet<String>,
}

impl QueryContext {
    pub fn new(
        schema: impl Into<String>,
        structure: Structure,
        meta_columns: MetaColumns,
        registry: &SerializationRegistry,
    ) -> Self {
        let default_layout = structure
            .layers()
            .iter()
            .filter(|l| registry.has_default_span_layout(structure.serialisation_tag(&l.name).as_deref()))
            .map(|l| l.name.clone())
            .collect();
        Self {
            schema: schema.into(),
            structure,
            meta_columns,
            default_layout,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn collection(&self) -> &str {
        self.structure.collection()
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    pub fn meta_columns(&self) -> &MetaColumns {
        &self.meta_columns
    }

    /// `"schema"."collection"`
    pub fn collection_table(&self) -> String {
        qualified(&self.schema, self.collection())
    }

    /// Qualified table of a tabled layer
    pub fn layer_table(&self, layer: &str) -> Result<String> {
        let table = match self.structure.layer_type(layer)? {
            LayerType::Detached | LayerType::Sparse => layer_table(self.collection(), layer),
            LayerType::Fragmented => fragment_table(self.collection(), layer),
            LayerType::Attached => {
                return Err(LayerStoreError::InvalidArgument(format!(
                    "layer {:?} is attached and has no table",
                    layer
                )))
            }
        };
        Ok(qualified(&self.schema, &table))
    }

    pub fn meta_type(&self, column: &str) -> Result<MetaType> {
        self.meta_columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| {
                LayerStoreError::InvalidArgument(format!(
                    "collection {:?} has no meta column {:?}",
                    self.collection(),
                    column
                ))
            })
    }

    /// True if attribute filters can be rendered against the layer's payload
    pub fn has_default_span_layout(&self, layer: &str) -> bool {
        self.default_layout.contains(layer)
    }

    /// Qualified name identifying the collection across contexts
    pub(crate) fn identity(&self) -> String {
        format!("{}.{}", self.schema, self.collection())
    }
}
