//! Join clause builder
//!
//! Every detached layer is joined on `collection."id" = layer."text_id"`.
//! The join kind depends on sparsity:
//!
//! ```text
//! layer       policy            join
//! ──────────  ────────────────  ──────────
//! detached    any               INNER
//! sparse      KeepAsTemplate    LEFT
//! sparse      KeepAsNull        LEFT
//! sparse      Drop              INNER  (documents without content excluded)
//! fragmented  any               unsupported
//! ```

use crate::error::{LayerStoreError, Result};
use crate::model::LayerType;

use super::{QueryContext, Sql};

/// How documents without content for a sparse layer are returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SparsePolicy {
    /// Keep the document; substitute the layer's empty template
    #[default]
    KeepAsTemplate,
    /// Keep the document without the layer
    KeepAsNull,
    /// Skip the document
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Join {
    layer: String,
    table: String,
    kind: JoinKind,
}

/// Ordered list of layer joins against one collection
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    collection: String,
    collection_table: String,
    joins: Vec<Join>,
}

impl JoinClause {
    /// Joins for `layers` (attached layers are skipped: they live in the document row)
    pub fn new<S: AsRef<str>>(context: &QueryContext, layers: &[S], policy: SparsePolicy) -> Result<Self> {
        let mut joins = Vec::with_capacity(layers.len());
        for layer in layers {
            let layer = layer.as_ref();
            let kind = match context.structure().layer_type(layer)? {
                LayerType::Attached => continue,
                LayerType::Detached => JoinKind::Inner,
                LayerType::Sparse if policy == SparsePolicy::Drop => JoinKind::Inner,
                LayerType::Sparse => JoinKind::Left,
                LayerType::Fragmented => {
                    return Err(LayerStoreError::UnsupportedLayerType {
                        layer: layer.to_string(),
                        layer_type: LayerType::Fragmented.to_string(),
                    })
                }
            };
            joins.push(Join {
                layer: layer.to_string(),
                table: context.layer_table(layer)?,
                kind,
            });
        }
        Ok(Self {
            collection: context.identity(),
            collection_table: context.collection_table(),
            joins,
        })
    }

    /// Concatenate the joins of two clauses over the same collection
    pub fn combine(mut self, other: JoinClause) -> Result<Self> {
        if self.collection != other.collection {
            return Err(LayerStoreError::IncompatibleCollections {
                left: self.collection,
                right: other.collection,
            });
        }
        self.joins.extend(other.joins);
        Ok(self)
    }

    /// Joined layers in order
    pub fn layers(&self) -> Vec<&str> {
        self.joins.iter().map(|j| j.layer.as_str()).collect()
    }

    pub fn kind_of(&self, layer: &str) -> Option<JoinKind> {
        self.joins.iter().find(|j| j.layer == layer).map(|j| j.kind)
    }

    /// `FROM c [LEFT] JOIN l ON c."id" = l."text_id" ...`
    pub fn to_sql(&self) -> Sql {
        let mut sql = Sql::raw(format!("FROM {}", self.collection_table));
        for join in &self.joins {
            sql.push_str(&format!(
                " {} {} ON {}.\"id\" = {}.\"text_id\"",
                join.kind.as_sql(),
                join.table,
                self.collection_table,
                join.table
            ));
        }
        sql
    }
}
